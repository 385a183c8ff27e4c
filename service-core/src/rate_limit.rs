use crate::error::AppError;
use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{hash::Hash, num::NonZeroU32, sync::Arc, time::Duration};

/// Rate limiter for a single subject
pub type UnkeyedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Per-key rate limiters, each with its own quota
pub type KeyedRateLimiters<K> = Arc<DashMap<K, UnkeyedRateLimiter>>;

/// Create a token-bucket limiter refilling at `requests_per_second` with room
/// for `burst_size` back-to-back requests. A zero burst falls back to the rate.
pub fn create_unkeyed_rate_limiter(
    requests_per_second: u32,
    burst_size: u32,
) -> Result<UnkeyedRateLimiter, AppError> {
    let per_second = NonZeroU32::new(requests_per_second).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("requests_per_second must be positive"))
    })?;
    let burst = NonZeroU32::new(burst_size).unwrap_or(per_second);

    let quota = Quota::per_second(per_second).allow_burst(burst);

    Ok(Arc::new(RateLimiter::direct(quota)))
}

/// Create an empty map of per-key limiters
pub fn create_keyed_rate_limiters<K: Eq + Hash>() -> KeyedRateLimiters<K> {
    Arc::new(DashMap::new())
}

/// Take one cell from the limiter, or report how long until one is available.
pub fn check_rate_limit(limiter: &UnkeyedRateLimiter) -> Result<(), Duration> {
    limiter
        .check()
        .map_err(|negative| negative.wait_time_from(DefaultClock::default().now()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = create_unkeyed_rate_limiter(5, 10).unwrap();
        assert!(check_rate_limit(&limiter).is_ok());
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        assert!(matches!(
            create_unkeyed_rate_limiter(0, 10),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_rate_limiter_allows_burst_then_blocks() {
        let limiter = create_unkeyed_rate_limiter(1, 3).unwrap();

        // Burst of 3 should succeed
        assert!(check_rate_limit(&limiter).is_ok());
        assert!(check_rate_limit(&limiter).is_ok());
        assert!(check_rate_limit(&limiter).is_ok());

        // 4th request should be rate limited with a positive wait
        let wait = check_rate_limit(&limiter).unwrap_err();
        assert!(wait > Duration::ZERO);
    }

    #[test]
    fn test_zero_burst_falls_back_to_rate() {
        let limiter = create_unkeyed_rate_limiter(4, 0).unwrap();
        for _ in 0..4 {
            assert!(check_rate_limit(&limiter).is_ok());
        }
        assert!(check_rate_limit(&limiter).is_err());
    }

    #[test]
    fn test_keyed_limiters_are_independent() {
        let limiters = create_keyed_rate_limiters::<String>();
        let a = limiters
            .entry("a".to_string())
            .or_insert_with(|| create_unkeyed_rate_limiter(1, 1).unwrap())
            .clone();
        let b = limiters
            .entry("b".to_string())
            .or_insert_with(|| create_unkeyed_rate_limiter(1, 1).unwrap())
            .clone();

        assert!(check_rate_limit(&a).is_ok());
        assert!(check_rate_limit(&a).is_err());
        assert!(check_rate_limit(&b).is_ok());
    }
}
