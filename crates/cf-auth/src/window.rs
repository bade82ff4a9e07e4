//! Anti-replay window on the claimed signing time.

use crate::config::Configuration;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};

/// Bounds on how far a signing time may drift from the time a request is
/// received. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayWindow {
    max_age_secs: u64,
    max_ahead_secs: u64,
}

impl ReplayWindow {
    pub fn new(max_age_secs: u64, max_ahead_secs: u64) -> Self {
        Self {
            max_age_secs,
            max_ahead_secs,
        }
    }

    /// Builds the window configured for logins.
    pub fn from_config(config: &Configuration) -> Self {
        Self::new(
            config.login_max_seconds_not_before,
            config.login_max_seconds_not_after,
        )
    }

    /// Accepts `signing_time` iff
    /// `received_at - max_age <= signing_time <= received_at + max_ahead`.
    pub fn check(&self, signing_time: DateTime<Utc>, received_at: DateTime<Utc>) -> Result<()> {
        let oldest = received_at
            .checked_sub_signed(seconds(self.max_age_secs))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let furthest = received_at
            .checked_add_signed(seconds(self.max_ahead_secs))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        if signing_time < oldest {
            return Err(Error::RequestTooOld {
                signed_at: signing_time,
                received_at,
                max_age_secs: self.max_age_secs,
            });
        }
        if signing_time > furthest {
            return Err(Error::RequestTooFarInFuture {
                signed_at: signing_time,
                received_at,
                max_ahead_secs: self.max_ahead_secs,
            });
        }
        Ok(())
    }
}

fn seconds(secs: u64) -> Duration {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
    Duration::seconds(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_accepts_exact_receipt_time() {
        let window = ReplayWindow::new(300, 60);
        assert!(window.check(received(), received()).is_ok());
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let window = ReplayWindow::new(300, 60);
        assert!(window.check(received() - Duration::seconds(300), received()).is_ok());
        assert!(window.check(received() + Duration::seconds(60), received()).is_ok());
    }

    #[test]
    fn test_too_old() {
        let window = ReplayWindow::new(300, 60);
        let err = window
            .check(received() - Duration::seconds(301), received())
            .unwrap_err();
        assert!(matches!(err, Error::RequestTooOld { max_age_secs: 300, .. }));
        assert!(err.to_string().contains("allowable seconds old is 300"));
    }

    #[test]
    fn test_too_far_in_future() {
        let window = ReplayWindow::new(300, 60);
        let err = window
            .check(received() + Duration::seconds(61), received())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RequestTooFarInFuture { max_ahead_secs: 60, .. }
        ));
    }

    #[test]
    fn test_huge_bounds_do_not_overflow() {
        let window = ReplayWindow::new(u64::MAX, u64::MAX);
        assert!(window.check(received(), received()).is_ok());
    }

    #[test]
    fn test_zero_width_window() {
        let window = ReplayWindow::new(0, 0);
        assert!(window.check(received(), received()).is_ok());
        assert!(window.check(received() - Duration::seconds(1), received()).is_err());
        assert!(window.check(received() + Duration::seconds(1), received()).is_err());
    }
}
