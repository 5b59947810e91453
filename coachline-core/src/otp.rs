use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ids;

/// Purpose an OTP gates. Each purpose keeps its own verification state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationType {
    CommuterVerification,
    ETicketVerificationGet,
    LostParcelVerificationGet,
}

wire_enum!(VerificationType, "verificationType", {
    CommuterVerification => "COMMUTER_VERIFICATION",
    ETicketVerificationGet => "E_TICKET_VERIFICATION_GET",
    LostParcelVerificationGet => "LOST_PARCEL_VERIFICATION_GET",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    NotVerified,
    Verified,
}

wire_enum!(VerificationStatus, "verificationStatus", {
    NotVerified => "NOT_VERIFIED",
    Verified => "VERIFIED",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OtpVerification {
    pub verification_id: i64,
    /// Never leaves the service except through the notification channel.
    #[serde(skip_serializing)]
    pub otp: String,
    pub expiry_at: DateTime<Utc>,
    pub booking_id: i64,
    #[serde(rename = "type")]
    pub verification_type: VerificationType,
    pub status: VerificationStatus,
    pub created_at: DateTime<Utc>,
}

impl OtpVerification {
    pub fn issue(
        booking_id: i64,
        verification_type: VerificationType,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            verification_id: ids::short_id(),
            otp: ids::otp_code(),
            expiry_at: now + ttl,
            booking_id,
            verification_type,
            status: VerificationStatus::NotVerified,
            created_at: now,
        }
    }

    /// Expired records behave as if they were never stored.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expiry_at > now
    }

    pub fn is_verified(&self) -> bool {
        self.status == VerificationStatus::Verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_sets_ttl_and_unverified() {
        let now = Utc::now();
        let otp = OtpVerification::issue(1, VerificationType::CommuterVerification, Duration::minutes(4), now);

        assert_eq!(otp.status, VerificationStatus::NotVerified);
        assert_eq!(otp.expiry_at, now + Duration::minutes(4));
        assert!(otp.is_live(now));
        assert!(!otp.is_live(now + Duration::minutes(4)));
    }

    #[test]
    fn test_code_is_not_serialized() {
        let otp = OtpVerification::issue(1, VerificationType::ETicketVerificationGet, Duration::minutes(1), Utc::now());
        let json = serde_json::to_value(&otp).unwrap();

        assert!(json.get("otp").is_none());
        assert_eq!(json["type"], "E_TICKET_VERIFICATION_GET");
        assert_eq!(json["status"], "NOT_VERIFIED");
    }
}
