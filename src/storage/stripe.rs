//! Striped mutex map.
//!
//! A fixed array of async mutexes indexed by key modulo stripe count. Two
//! equal keys always share a stripe, so operations on one table serialise;
//! distinct small keys land on distinct stripes and proceed in parallel.

use tokio::sync::{Mutex, MutexGuard};

/// Default number of stripes
pub const DEFAULT_STRIPE_COUNT: usize = 16;

/// A striped map of async mutexes keyed by `i32`
pub struct StripedMutexMap {
    stripes: Vec<Mutex<()>>,
}

impl StripedMutexMap {
    /// Create a map with `stripe_count` stripes
    pub fn new(stripe_count: usize) -> Self {
        assert!(stripe_count > 0, "stripe count must be positive");
        Self {
            stripes: (0..stripe_count).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Stripe index a key maps to
    pub fn stripe_index(&self, key: i32) -> usize {
        key.rem_euclid(self.stripes.len() as i32) as usize
    }

    /// Lock the stripe for `key`, waiting if another holder has it
    pub async fn lock(&self, key: i32) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_index(key)].lock().await
    }
}

impl Default for StripedMutexMap {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPE_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_same_stripe() {
        let map = StripedMutexMap::new(16);
        assert_eq!(map.stripe_index(301), map.stripe_index(301));
        assert_ne!(map.stripe_index(401), map.stripe_index(402));
        // negative keys stay in range
        assert!(map.stripe_index(-5) < 16);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_per_stripe() {
        let map = StripedMutexMap::new(4);
        let guard = map.lock(1).await;
        // a different stripe is immediately available
        let other = map.stripes[map.stripe_index(2)].try_lock();
        assert!(other.is_ok());
        // the same stripe is not
        assert!(map.stripes[map.stripe_index(1)].try_lock().is_err());
        drop(guard);
        assert!(map.stripes[map.stripe_index(1)].try_lock().is_ok());
    }
}
