use std::time::Duration;

use pbx_archive_sync::scheduler::backoff_delay;

#[test]
fn test_backoff_doubles_from_base() {
    assert_eq!(backoff_delay(1), Duration::from_secs(30));
    assert_eq!(backoff_delay(2), Duration::from_secs(60));
    assert_eq!(backoff_delay(3), Duration::from_secs(120));
    assert_eq!(backoff_delay(4), Duration::from_secs(240));
}

#[test]
fn test_backoff_caps_at_ten_minutes() {
    assert_eq!(backoff_delay(6), Duration::from_secs(600));
    assert_eq!(backoff_delay(50), Duration::from_secs(600));
    assert_eq!(backoff_delay(u32::MAX), Duration::from_secs(600));
}

#[test]
fn test_backoff_zero_failures_is_base() {
    assert_eq!(backoff_delay(0), Duration::from_secs(30));
}
