//! Pulling scheduled refreshes earlier to avoid stampedes
//!
//! When many clients receive tokens with the same expiry, they would all
//! try to refresh at the same moment. A [`JitterSource`] lets each one pick
//! a slightly earlier time instead.

use tokenflight_clock::UnixTime;

/// A type that provides some jittering of time
pub trait JitterSource {
    /// Jitters a given input time
    ///
    /// Implementations should only ever move the time earlier, so that a
    /// refresh is never scheduled past the point where it is due.
    fn jitter(&mut self, time: UnixTime) -> UnixTime;
}

/// A jitter source that does not do any jittering of time
#[derive(Clone, Copy, Debug, Default)]
pub struct NullJitter;

impl JitterSource for NullJitter {
    #[inline]
    fn jitter(&mut self, time: UnixTime) -> UnixTime {
        time
    }
}

#[cfg(feature = "rand")]
mod random {
    use rand::{Rng, SeedableRng};
    use tokenflight_clock::{DurationSecs, UnixTime};

    /// Jitters a value earlier by a random amount
    ///
    /// Times jittered by this type will have a value with a uniform distribution
    /// in the interval `(time - max_jitter, time]`.
    #[derive(Debug)]
    pub struct RandomEarlyJitter<R> {
        max_jitter: DurationSecs,
        rand_source: R,
    }

    impl RandomEarlyJitter<rand::rngs::StdRng> {
        /// Constructs a new instance that will jitter times early up to `max_jitter`.
        pub fn new(max_jitter: DurationSecs) -> Self {
            Self::with_rng(max_jitter, rand::rngs::StdRng::from_entropy())
        }
    }

    impl<R: Rng> RandomEarlyJitter<R> {
        /// Constructs a new instance drawing from the given random source
        pub fn with_rng(max_jitter: DurationSecs, rand_source: R) -> Self {
            Self {
                max_jitter,
                rand_source,
            }
        }
    }

    impl<R: Rng> super::JitterSource for RandomEarlyJitter<R> {
        fn jitter(&mut self, time: UnixTime) -> UnixTime {
            if self.max_jitter.is_zero() {
                return time;
            }

            let jitter = self.rand_source.gen_range(0..self.max_jitter.0);
            time - DurationSecs(jitter)
        }
    }
}

#[cfg(feature = "rand")]
#[cfg_attr(docsrs, doc(cfg(feature = "rand")))]
pub use random::RandomEarlyJitter;
