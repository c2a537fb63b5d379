//! Post-payment effects parked in the cache until the gateway settles

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifetime of a parked payload, matching the payment expiry
pub const PAYLOAD_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum PaymentPayload {
    Boost { student_id: Uuid },
    Challenge { student_id: Uuid },
    Guidance { student_id: Uuid, mentor_id: Uuid },
}

/// Cache key of a payment's payload
pub fn payload_key(payment_id: Uuid) -> String {
    format!("payment:{payment_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_wire_format() {
        let student_id = Uuid::now_v7();
        let mentor_id = Uuid::now_v7();

        let guidance = PaymentPayload::Guidance {
            student_id,
            mentor_id,
        };
        assert_eq!(
            serde_json::to_value(&guidance).unwrap(),
            json!({
                "type": "guidance",
                "data": { "student_id": student_id, "mentor_id": mentor_id }
            })
        );

        let boost: PaymentPayload = serde_json::from_value(json!({
            "type": "boost",
            "data": { "student_id": student_id }
        }))
        .unwrap();
        assert_eq!(boost, PaymentPayload::Boost { student_id });
    }

    #[test]
    fn unknown_payload_type_is_rejected() {
        let result = serde_json::from_value::<PaymentPayload>(json!({
            "type": "refund",
            "data": {}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn key_is_namespaced() {
        let id = Uuid::nil();
        assert_eq!(payload_key(id), format!("payment:{id}"));
    }
}
