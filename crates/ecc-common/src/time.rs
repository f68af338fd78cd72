//! ---
//! ecc_section: "01-core-functionality"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Shared primitives and utilities for the core runtime."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Wall-clock timestamp used for every event on the bus.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Time elapsed between `earlier` and `now`. Clock skew that puts `earlier`
/// in the future yields zero rather than a negative span.
pub fn elapsed_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - earlier).to_std().unwrap_or(Duration::ZERO)
}

/// Convert a duration into whole milliseconds, saturating at `u64::MAX`.
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Best-effort host name for service identities.
pub fn machine_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|name| name.trim().to_owned())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_never_negative() {
        let now = utc_now();
        let future = now + chrono::Duration::seconds(5);
        assert_eq!(elapsed_between(future, now), Duration::ZERO);
        assert_eq!(
            elapsed_between(now - chrono::Duration::seconds(3), now),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn millis_conversion() {
        assert_eq!(duration_to_millis(Duration::from_micros(2_500)), 2);
        assert_eq!(duration_to_millis(Duration::from_secs(4)), 4_000);
    }
}
