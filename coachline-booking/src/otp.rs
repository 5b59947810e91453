use chrono::{Duration, Utc};
use coachline_core::otp::{OtpVerification, VerificationType};
use coachline_core::repository::OtpRepository;
use coachline_core::BoxError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a gated read: the protected payload, or the id of the OTP the
/// caller has to verify before asking again.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum GatedAccess<T> {
    Granted(T),
    #[serde(rename_all = "camelCase")]
    Challenge { verification_id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum OtpCheck {
    /// This call flipped the record to `VERIFIED`.
    Verified(OtpVerification),
    /// Wrong code; the record is unchanged and can be retried until it expires.
    Mismatch(OtpVerification),
}

impl OtpCheck {
    pub fn record(&self) -> &OtpVerification {
        match self {
            OtpCheck::Verified(v) | OtpCheck::Mismatch(v) => v,
        }
    }

    pub fn into_record(self) -> OtpVerification {
        match self {
            OtpCheck::Verified(v) | OtpCheck::Mismatch(v) => v,
        }
    }
}

/// Issues and checks one-time codes. Each (booking, purpose) pair keeps its
/// own records, so verifying one purpose never unlocks another.
#[derive(Clone)]
pub struct OtpVerificationStore {
    repo: Arc<dyn OtpRepository>,
}

impl OtpVerificationStore {
    pub fn new(repo: Arc<dyn OtpRepository>) -> Self {
        Self { repo }
    }

    pub async fn issue(
        &self,
        booking_id: i64,
        verification_type: VerificationType,
        ttl: Duration,
    ) -> Result<OtpVerification, OtpError> {
        let verification = OtpVerification::issue(booking_id, verification_type, ttl, Utc::now());
        self.repo.insert(&verification).await.map_err(OtpError::Storage)?;

        info!(
            "Issued {} OTP {} for booking {}",
            verification_type, verification.verification_id, booking_id
        );
        Ok(verification)
    }

    pub async fn check(&self, verification_id: i64, submitted: &str) -> Result<OtpCheck, OtpError> {
        let now = Utc::now();
        let current = self
            .repo
            .find_live(verification_id, now)
            .await
            .map_err(OtpError::Storage)?
            .ok_or(OtpError::NotFoundOrExpired)?;

        if current.is_verified() {
            return Err(OtpError::AlreadyVerified);
        }

        if !codes_match(&current.otp, submitted) {
            debug!("OTP mismatch for verification {}", verification_id);
            return Ok(OtpCheck::Mismatch(current));
        }

        match self.repo.mark_verified(verification_id, now).await.map_err(OtpError::Storage)? {
            Some(verified) => {
                info!("Verification {} completed", verification_id);
                Ok(OtpCheck::Verified(verified))
            }
            // Lost the race to a concurrent submit, or the record lapsed in between.
            None => match self.repo.find_live(verification_id, now).await.map_err(OtpError::Storage)? {
                Some(v) if v.is_verified() => Err(OtpError::AlreadyVerified),
                _ => Err(OtpError::NotFoundOrExpired),
            },
        }
    }

    pub async fn require_verified(&self, booking_id: i64, verification_type: VerificationType) -> Result<bool, OtpError> {
        Ok(self.find_verified(booking_id, verification_type).await?.is_some())
    }

    pub async fn find_verified(
        &self,
        booking_id: i64,
        verification_type: VerificationType,
    ) -> Result<Option<OtpVerification>, OtpError> {
        self.repo
            .find_verified(booking_id, verification_type, Utc::now())
            .await
            .map_err(OtpError::Storage)
    }

    pub async fn latest(
        &self,
        booking_id: i64,
        verification_type: VerificationType,
    ) -> Result<Option<OtpVerification>, OtpError> {
        self.repo
            .latest_live(booking_id, verification_type, Utc::now())
            .await
            .map_err(OtpError::Storage)
    }

    pub async fn purge_expired(&self) -> Result<u64, OtpError> {
        self.repo.purge_expired(Utc::now()).await.map_err(OtpError::Storage)
    }
}

/// Trimmed, constant-time comparison of the stored and submitted codes.
fn codes_match(stored: &str, submitted: &str) -> bool {
    constant_time_eq::constant_time_eq(stored.trim().as_bytes(), submitted.trim().as_bytes())
}

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("requested verificationId is incorrect or expired")]
    NotFoundOrExpired,

    #[error("this verification is already completed")]
    AlreadyVerified,

    #[error("otp storage failure: {0}")]
    Storage(BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use coachline_core::memory::InMemoryStore;
    use coachline_core::otp::VerificationStatus;

    fn store() -> (OtpVerificationStore, Arc<InMemoryStore>) {
        let repo = Arc::new(InMemoryStore::new());
        (OtpVerificationStore::new(repo.clone()), repo)
    }

    #[tokio::test]
    async fn test_wrong_code_leaves_record_usable() {
        let (otps, _) = store();
        let issued = otps.issue(1, VerificationType::CommuterVerification, Duration::minutes(10)).await.unwrap();
        let wrong = if issued.otp == "1000" { "1001" } else { "1000" };

        let first = otps.check(issued.verification_id, wrong).await.unwrap();
        assert!(matches!(first, OtpCheck::Mismatch(ref v) if v.status == VerificationStatus::NotVerified));

        let second = otps.check(issued.verification_id, &issued.otp).await.unwrap();
        assert!(matches!(second, OtpCheck::Verified(ref v) if v.status == VerificationStatus::Verified));
    }

    #[tokio::test]
    async fn test_verified_record_cannot_be_verified_again() {
        let (otps, _) = store();
        let issued = otps.issue(1, VerificationType::ETicketVerificationGet, Duration::minutes(4)).await.unwrap();

        otps.check(issued.verification_id, &format!(" {} ", issued.otp)).await.unwrap();
        let again = otps.check(issued.verification_id, &issued.otp).await;

        assert!(matches!(again, Err(OtpError::AlreadyVerified)));
        assert!(otps.require_verified(1, VerificationType::ETicketVerificationGet).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_record_never_verifies() {
        let (otps, repo) = store();
        let mut lapsed = OtpVerification::issue(1, VerificationType::CommuterVerification, Duration::minutes(10), Utc::now());
        lapsed.expiry_at = Utc::now() - Duration::seconds(1);
        repo.insert(&lapsed).await.unwrap();

        let result = otps.check(lapsed.verification_id, &lapsed.otp).await;
        assert!(matches!(result, Err(OtpError::NotFoundOrExpired)));
        assert!(otps.latest(1, VerificationType::CommuterVerification).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purposes_do_not_share_verification() {
        let (otps, _) = store();
        let commuter = otps.issue(9, VerificationType::CommuterVerification, Duration::minutes(10)).await.unwrap();
        otps.check(commuter.verification_id, &commuter.otp).await.unwrap();

        assert!(otps.require_verified(9, VerificationType::CommuterVerification).await.unwrap());
        assert!(!otps.require_verified(9, VerificationType::ETicketVerificationGet).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_correct_codes_flip_once() {
        let (otps, _) = store();
        let issued = otps.issue(3, VerificationType::CommuterVerification, Duration::minutes(10)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let otps = otps.clone();
            let code = issued.otp.clone();
            let id = issued.verification_id;
            handles.push(tokio::spawn(async move { otps.check(id, &code).await }));
        }

        let mut flipped = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(OtpCheck::Verified(_)) => flipped += 1,
                Err(OtpError::AlreadyVerified) => {}
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        assert_eq!(flipped, 1);
    }
}
