use base64ct::Encoding;
use chrono::{DateTime, Utc};
use rand::RngCore;

/// Source of wall-clock time and fresh opaque token material.
///
/// The registry never calls `Utc::now()` or the RNG directly; everything
/// time- or identity-dependent goes through this trait so tests can pin both.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// A fresh opaque token. 128 bits of RNG output, base64url without
    /// padding. Collisions are treated as impossible by callers; the
    /// registry still double-checks against outstanding tokens.
    fn new_token(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn new_token(&self) -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        base64ct::Base64UrlUnpadded::encode_string(&bytes)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_tokens_are_distinct_and_urlsafe() {
        let clock = SystemClock;
        let a = clock.new_token();
        let b = clock.new_token();
        assert_ne!(a, b);
        // 16 bytes -> 22 chars of unpadded base64url
        assert_eq!(a.len(), 22);
        assert!(!a.contains('='));
        assert!(!a.contains('+'));
        assert!(!a.contains('/'));
    }

    #[test]
    fn fixed_clock_is_settable() {
        use chrono::TimeZone;
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = test_support::FixedClock::at(t0);
        assert_eq!(clock.now(), t0);
        clock.advance_days(30);
        assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap());
    }
}
