//! Gateway notification signatures

use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

/// Lowercase hex `sha512(order_id ‖ status_code ‖ gross_amount ‖ server_key)`
pub fn notification_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a received signature against the expected one in constant time
pub fn verify_signature(
    received: &str,
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> bool {
    let expected = notification_signature(order_id, status_code, gross_amount, server_key);
    expected
        .as_bytes()
        .ct_eq(received.to_ascii_lowercase().as_bytes())
        .into()
}
