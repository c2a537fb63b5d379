//! One-time passwords for registration and password reset
//!
//! OTPs live only in the key-value store under `otp:{purpose}:{email}` and
//! are consumed on first successful use.

use std::sync::Arc;
use std::time::Duration;

use common::{
    cache::KeyValueStore,
    error::{AppError, AppResult},
};
use rand::Rng;

pub const OTP_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPurpose {
    Register,
    ResetPassword,
}

impl OtpPurpose {
    fn namespace(self) -> &'static str {
        match self {
            OtpPurpose::Register => "register",
            OtpPurpose::ResetPassword => "reset",
        }
    }

    pub fn key(self, email: &str) -> String {
        format!("otp:{}:{}", self.namespace(), email)
    }

    /// Subject and HTML body of the mail carrying `otp`
    pub fn mail(self, otp: &str) -> (&'static str, String) {
        let (subject, action) = match self {
            OtpPurpose::Register => ("Verify your ElevateU account", "finish creating your account"),
            OtpPurpose::ResetPassword => ("Reset your ElevateU password", "reset your password"),
        };
        let minutes = OTP_TTL.as_secs() / 60;
        let body = format!(
            "<p>Use the code below to {action}.</p>\
             <h2 style=\"letter-spacing:4px\">{otp}</h2>\
             <p>The code expires in {minutes} minutes. If you did not request it, ignore this email.</p>"
        );
        (subject, body)
    }
}

/// Six random decimal digits, zero padded
pub fn generate_otp<R: Rng>(rng: &mut R) -> String {
    format!("{:06}", rng.gen_range(0..1_000_000))
}

#[derive(Clone)]
pub struct OtpStore {
    store: Arc<dyn KeyValueStore>,
}

impl OtpStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        OtpStore { store }
    }

    /// Generate and store a fresh OTP, overwriting any previous one
    pub async fn issue(&self, purpose: OtpPurpose, email: &str) -> AppResult<String> {
        let otp = generate_otp(&mut rand::thread_rng());
        self.store
            .set(&purpose.key(email), &otp, Some(OTP_TTL))
            .await?;
        Ok(otp)
    }

    /// Check `otp` against the stored value and consume it on a match
    pub async fn consume(&self, purpose: OtpPurpose, email: &str, otp: &str) -> AppResult<()> {
        let key = purpose.key(email);
        match self.store.get(&key).await? {
            Some(stored) if stored == otp => {
                self.store.delete(&key).await?;
                Ok(())
            }
            _ => Err(AppError::InvalidOtp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::cache::MemoryStore;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn generated_otps_are_six_digits() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let otp = generate_otp(&mut rng);
            assert_eq!(otp.len(), 6);
            assert!(otp.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn purposes_use_separate_keys() {
        assert_eq!(
            OtpPurpose::Register.key("a@b.co"),
            "otp:register:a@b.co"
        );
        assert_eq!(
            OtpPurpose::ResetPassword.key("a@b.co"),
            "otp:reset:a@b.co"
        );
    }

    #[tokio::test]
    async fn otp_is_single_use() {
        let store = OtpStore::new(Arc::new(MemoryStore::new()));
        let otp = store.issue(OtpPurpose::Register, "a@b.co").await.unwrap();

        // wrong purpose does not match
        assert!(matches!(
            store.consume(OtpPurpose::ResetPassword, "a@b.co", &otp).await,
            Err(AppError::InvalidOtp)
        ));

        store
            .consume(OtpPurpose::Register, "a@b.co", &otp)
            .await
            .unwrap();
        assert!(matches!(
            store.consume(OtpPurpose::Register, "a@b.co", &otp).await,
            Err(AppError::InvalidOtp)
        ));
    }

    #[tokio::test]
    async fn reissue_replaces_previous_otp() {
        let memory = MemoryStore::new();
        let store = OtpStore::new(Arc::new(memory.clone()));

        memory
            .set("otp:register:a@b.co", "111111", Some(OTP_TTL))
            .await
            .unwrap();
        let fresh = store.issue(OtpPurpose::Register, "a@b.co").await.unwrap();

        if fresh != "111111" {
            assert!(matches!(
                store.consume(OtpPurpose::Register, "a@b.co", "111111").await,
                Err(AppError::InvalidOtp)
            ));
        }
        store
            .consume(OtpPurpose::Register, "a@b.co", &fresh)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn otp_expires_after_fifteen_minutes() {
        let store = OtpStore::new(Arc::new(MemoryStore::new()));
        let otp = store
            .issue(OtpPurpose::ResetPassword, "a@b.co")
            .await
            .unwrap();

        tokio::time::advance(OTP_TTL + Duration::from_secs(1)).await;

        assert!(matches!(
            store.consume(OtpPurpose::ResetPassword, "a@b.co", &otp).await,
            Err(AppError::InvalidOtp)
        ));
    }
}
