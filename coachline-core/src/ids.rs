use rand::Rng;

pub const SHORT_ID_MIN: i64 = 10_000_000;
pub const SHORT_ID_MAX: i64 = 99_999_999;

/// 8-digit public identifier used for bookings, payments, verifications,
/// payment requests, callbacks and parcels.
pub fn short_id() -> i64 {
    rand::thread_rng().gen_range(SHORT_ID_MIN..=SHORT_ID_MAX)
}

/// 4-digit one-time code, kept as text so leading formatting never matters.
pub fn otp_code() -> String {
    rand::thread_rng().gen_range(1000..=9999u32).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_has_eight_digits() {
        for _ in 0..1000 {
            let id = short_id();
            assert!((SHORT_ID_MIN..=SHORT_ID_MAX).contains(&id));
            assert_eq!(id.to_string().len(), 8);
        }
    }

    #[test]
    fn test_otp_is_four_digits() {
        for _ in 0..1000 {
            let otp = otp_code();
            assert_eq!(otp.len(), 4);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
