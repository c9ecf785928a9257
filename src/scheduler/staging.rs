use crate::scheduler::KeyFn;
use crate::types::Payload;

/// The input side of the scheduler: wraps the caller's iterator and key
/// extractor and exposes a one-item lookahead.
///
/// Staging is the engine's sole backpressure point. The scheduler only
/// pulls from it while the admission rule allows; an item that cannot be
/// admitted parks in the overflow slot and the underlying iterator is not
/// advanced further, which pauses arbitrarily large or infinite inputs.
pub(crate) struct Staging<T> {
    source: Box<dyn Iterator<Item = T> + Send>,
    key: Option<KeyFn<T>>,
    overflow: Option<Payload<T>>,
    exhausted: bool,
}

impl<T> Staging<T> {
    pub(crate) fn new(source: Box<dyn Iterator<Item = T> + Send>, key: Option<KeyFn<T>>) -> Self {
        Self {
            source,
            key,
            overflow: None,
            exhausted: false,
        }
    }

    /// Look at the next pending payload, pulling one item from the source
    /// if the overflow slot is empty. Returns `None` once the source is
    /// exhausted and nothing is parked.
    pub(crate) fn peek(&mut self) -> Option<&Payload<T>> {
        if self.overflow.is_none() && !self.exhausted {
            match self.source.next() {
                Some(item) => {
                    self.overflow = Some(Payload::from_item(item, self.key.as_ref()));
                }
                None => self.exhausted = true,
            }
        }

        self.overflow.as_ref()
    }

    /// Take the payload previously surfaced by [`Staging::peek`].
    pub(crate) fn take(&mut self) -> Option<Payload<T>> {
        self.overflow.take()
    }

    /// Whether no further payload will ever come out of staging.
    pub(crate) const fn is_done(&self) -> bool {
        self.exhausted && self.overflow.is_none()
    }
}
