use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// A 32-bit monotonic counter that wraps modulo 2^32, used to derive the AEAD
/// nonce for every encrypted packet on a given key (spec §4.1).
///
/// Backed by an `Arc<AtomicU32>` rather than a plain integer: spec §5 requires
/// that "all callers on a given key share one counter ... use atomic
/// increments feeding a single AEAD invocation". Cloning a `NonceCounter`
/// yields a handle to the *same* counter, which is how two [`Aead`](crate::Aead)
/// instances for one session's audio and video streams stay on one nonce
/// space without sharing a single non-`Clone` `Aead`.
#[derive(Debug, Clone)]
pub struct NonceCounter(Arc<AtomicU32>);

impl NonceCounter {
    /// Returns the next counter value, advancing by one (wrapping).
    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for NonceCounter {
    fn default() -> Self {
        NonceCounter(Arc::new(AtomicU32::new(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_at_u32_max() {
        let c = NonceCounter(Arc::new(AtomicU32::new(u32::MAX)));
        assert_eq!(c.next(), u32::MAX);
        assert_eq!(c.next(), 0);
        assert_eq!(c.next(), 1);
    }

    #[test]
    fn clones_share_the_same_underlying_counter() {
        let a = NonceCounter::default();
        let b = a.clone();
        assert_eq!(a.next(), 0);
        assert_eq!(b.next(), 1);
        assert_eq!(a.next(), 2);
    }
}
