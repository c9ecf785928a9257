use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::types::Payload;

/// Signature of a dynamic throttle: computes the pause to apply between a
/// completion and the next dispatch on the same domain, from the domain key
/// and the payload that just completed.
pub type ThrottleFn<T> = Arc<dyn Fn(&str, &Payload<T>) -> Duration + Send + Sync>;

/// The throttle applied between consecutive hits on the same domain.
///
/// Either a constant pause or a function evaluated at each completion. The
/// evaluation always happens on the completing worker thread, never under
/// the scheduler lock, so a slow or panicking callable cannot stall the
/// dispatch of other domains.
pub enum Throttle<T> {
    /// The same pause for every domain and item
    Constant(Duration),
    /// A per-completion callable deciding the pause
    Dynamic(ThrottleFn<T>),
}

impl<T> Throttle<T> {
    /// Disable throttling entirely
    #[must_use]
    pub const fn none() -> Self {
        Throttle::Constant(Duration::ZERO)
    }

    /// Evaluate the throttle for a completed payload.
    pub(crate) fn delay(&self, domain: &str, payload: &Payload<T>) -> Duration {
        match self {
            Throttle::Constant(duration) => *duration,
            Throttle::Dynamic(callable) => callable(domain, payload),
        }
    }
}

impl<T> Default for Throttle<T> {
    fn default() -> Self {
        Throttle::Constant(crate::client::DEFAULT_THROTTLE)
    }
}

impl<T> Clone for Throttle<T> {
    fn clone(&self) -> Self {
        match self {
            Throttle::Constant(duration) => Throttle::Constant(*duration),
            Throttle::Dynamic(callable) => Throttle::Dynamic(Arc::clone(callable)),
        }
    }
}

impl<T> fmt::Debug for Throttle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Throttle::Constant(duration) => f.debug_tuple("Constant").field(duration).finish(),
            Throttle::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}
