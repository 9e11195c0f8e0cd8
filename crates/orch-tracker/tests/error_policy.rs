use orch_tracker::TrackerError;

#[test]
fn not_found_is_not_retryable() {
    assert!(!TrackerError::NotFound(42).is_retryable());
}

#[test]
fn rate_limited_is_not_retryable() {
    assert!(!TrackerError::RateLimited("slow down".into()).is_retryable());
}

#[test]
fn transient_is_retryable() {
    assert!(TrackerError::Transient("connection reset".into()).is_retryable());
}

#[test]
fn auth_and_permission_are_not_retryable() {
    assert!(!TrackerError::AuthFailed("bad token".into()).is_retryable());
    assert!(!TrackerError::PermissionDenied("no access".into()).is_retryable());
}
