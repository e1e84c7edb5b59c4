use std::time::Duration;

use backon::{Backoff, BackoffBuilder, ExponentialBuilder};

/// A [`Backoff`] that can also be reset.
///
/// Implemented by [`ResettableBackoffWrapper`].
// Separated into a trait so that it can be used as a trait object, erasing the backing [`BackoffBuilder`].
pub trait ResettableBackoff: Backoff {
    fn reset(&mut self);
}

/// Implements [`ResettableBackoff`] by reconstructing the backing [`Backoff`] each time [`Self::reset`] has been called.
///
/// Once the backing [`Backoff`] runs out of delays, the last delay it produced keeps being repeated:
/// a failing key is never given up on.
#[derive(Debug)]
pub struct ResettableBackoffWrapper<B: BackoffBuilder> {
    backoff_builder: B,
    current_backoff: Option<B::Backoff>,
    last_delay: Option<Duration>,
    attempts: usize,
}

impl<B: BackoffBuilder> ResettableBackoffWrapper<B> {
    pub fn new(backoff_builder: B) -> Self {
        Self {
            backoff_builder,
            current_backoff: None,
            last_delay: None,
            attempts: 0,
        }
    }

    /// Number of delays handed out since construction or the last reset
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl<B: BackoffBuilder + Default> Default for ResettableBackoffWrapper<B> {
    fn default() -> Self {
        Self::new(B::default())
    }
}

impl<B: BackoffBuilder + Clone> Iterator for ResettableBackoffWrapper<B> {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self
            .current_backoff
            .get_or_insert_with(|| self.backoff_builder.clone().build())
            .next()
            .or(self.last_delay);
        if next.is_some() {
            self.attempts += 1;
            self.last_delay = next;
        }
        next
    }
}

impl<B: BackoffBuilder + Clone> ResettableBackoff for ResettableBackoffWrapper<B> {
    fn reset(&mut self) {
        self.current_backoff = None;
        self.last_delay = None;
        self.attempts = 0;
    }
}

/// Bounded exponential backoff without jitter: `base`, `2 * base`, `4 * base`, ... capped at `max`
pub fn exponential(base: Duration, max: Duration) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(base)
        .with_max_delay(max)
        .with_factor(2.0)
        .without_max_times()
}
