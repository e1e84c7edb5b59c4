//! A deduplicating, rate-limited work queue
//!
//! Producers hold a cloneable [`QueueHandle`] and may [`enqueue`](QueueHandle::enqueue) from anywhere
//! without blocking. The single consumer drives the [`EventQueue`] as a [`Stream`] of keys that are due.
//!
//! A key that is already waiting is never queued twice: requesting it again only moves its due time
//! earlier, never later. Failures are retried through [`EventQueue::add_rate_limited`], which delays the
//! key by a per-key exponential backoff until [`EventQueue::forget`] is called.
use crate::utils::backoff::{self, ResettableBackoff, ResettableBackoffWrapper};
use backon::ExponentialBuilder;
use futures::{
    channel::mpsc,
    stream::{Fuse, FusedStream},
    Stream, StreamExt,
};
use pin_project::pin_project;
use std::{
    collections::{hash_map::Entry, HashMap},
    hash::Hash,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::time::delay_queue::{self, DelayQueue};

/// A request to emit `message` at a given `Instant` (`run_at`).
#[derive(Debug)]
pub struct ScheduleRequest<T> {
    pub message: T,
    pub run_at: Instant,
}

/// Internal metadata for a scheduled message.
struct ScheduledEntry {
    run_at: Instant,
    queue_key: delay_queue::Key,
}

/// Producer side of an [`EventQueue`].
///
/// Cloning produces another handle to the same queue.
pub struct QueueHandle<T> {
    requests: mpsc::UnboundedSender<ScheduleRequest<T>>,
}

impl<T> Clone for QueueHandle<T> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
        }
    }
}

impl<T> QueueHandle<T> {
    /// Queues `message` to be emitted as soon as possible.
    ///
    /// Never blocks. Queueing a message that is already waiting has no effect beyond making it due now.
    pub fn enqueue(&self, message: T) {
        self.send(ScheduleRequest {
            message,
            run_at: Instant::now(),
        });
    }

    /// Queues `message` to be emitted after `delay`.
    pub fn enqueue_after(&self, message: T, delay: Duration) {
        self.send(ScheduleRequest {
            message,
            run_at: Instant::now() + delay,
        });
    }

    /// Whether the consuming [`EventQueue`] has been dropped
    pub fn is_closed(&self) -> bool {
        self.requests.is_closed()
    }

    fn send(&self, request: ScheduleRequest<T>) {
        if self.requests.unbounded_send(request).is_err() {
            tracing::trace!("queue has shut down, dropping request");
        }
    }
}

/// Per-key failure tracking for [`EventQueue::add_rate_limited`]
struct RateLimiter<T> {
    builder: ExponentialBuilder,
    failures: HashMap<T, ResettableBackoffWrapper<ExponentialBuilder>>,
    max_delay: Duration,
}

impl<T: Eq + Hash + Clone> RateLimiter<T> {
    fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            builder: backoff::exponential(base_delay, max_delay),
            failures: HashMap::new(),
            max_delay,
        }
    }

    fn when(&mut self, message: &T) -> Duration {
        let builder = self.builder.clone();
        self.failures
            .entry(message.clone())
            .or_insert_with(|| ResettableBackoffWrapper::new(builder))
            .next()
            .unwrap_or(self.max_delay)
    }

    fn forget(&mut self, message: &T) {
        if let Some(mut backoff) = self.failures.remove(message) {
            backoff.reset();
        }
    }

    fn num_requeues(&self, message: &T) -> usize {
        self.failures.get(message).map_or(0, ResettableBackoffWrapper::attempts)
    }
}

/// Consumer side of the work queue, see the [module docs](self).
///
/// The stream ends once every [`QueueHandle`] has been dropped and nothing is left waiting.
#[pin_project(project = EventQueueProj)]
pub struct EventQueue<T> {
    /// Queue of already-scheduled messages.
    ///
    /// To keep `scheduled` in sync, use `schedule_message` and `poll_pop_queue_message`
    /// rather than manipulating this directly.
    queue: DelayQueue<T>,
    /// Metadata for all currently scheduled messages. Used to detect duplicate messages.
    scheduled: HashMap<T, ScheduledEntry>,
    rate_limiter: RateLimiter<T>,
    /// Incoming queue of scheduling requests.
    #[pin]
    requests: Fuse<mpsc::UnboundedReceiver<ScheduleRequest<T>>>,
}

/// Creates a new work queue with the default retry bounds (5ms doubling up to 1000s).
pub fn event_queue<T: Eq + Hash + Clone>() -> (QueueHandle<T>, EventQueue<T>) {
    event_queue_with_backoff(Duration::from_millis(5), Duration::from_secs(1000))
}

/// Creates a new work queue whose failed messages are retried after `base_delay`, doubling up to `max_delay`.
pub fn event_queue_with_backoff<T: Eq + Hash + Clone>(
    base_delay: Duration,
    max_delay: Duration,
) -> (QueueHandle<T>, EventQueue<T>) {
    let (tx, rx) = mpsc::unbounded();
    (QueueHandle { requests: tx }, EventQueue {
        queue: DelayQueue::new(),
        scheduled: HashMap::new(),
        rate_limiter: RateLimiter::new(base_delay, max_delay),
        requests: rx.fuse(),
    })
}

impl<T: Eq + Hash + Clone> EventQueue<T> {
    /// Re-queues `message` after its rate limited delay, returning that delay.
    ///
    /// Each call without an intervening [`forget`](Self::forget) doubles the delay, up to the configured maximum.
    pub fn add_rate_limited(&mut self, message: T) -> Duration {
        let delay = self.rate_limiter.when(&message);
        self.schedule_after(message, delay);
        delay
    }

    /// Re-queues `message` after `delay`, without touching its rate limit.
    pub fn schedule_after(&mut self, message: T, delay: Duration) {
        schedule_message(&mut self.queue, &mut self.scheduled, ScheduleRequest {
            message,
            run_at: Instant::now() + delay,
        });
    }

    /// Resets the rate limit of `message`, so the next failure starts from the base delay again.
    pub fn forget(&mut self, message: &T) {
        self.rate_limiter.forget(message);
    }

    /// How many times `message` has been rate limited since it was last forgotten.
    pub fn num_requeues(&self, message: &T) -> usize {
        self.rate_limiter.num_requeues(message)
    }

    /// Whether `message` is currently waiting to be emitted
    pub fn contains(&self, message: &T) -> bool {
        self.scheduled.contains_key(message)
    }

    /// Number of distinct messages waiting to be emitted
    pub fn len(&self) -> usize {
        self.scheduled.len()
    }

    /// Whether nothing is waiting to be emitted
    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }
}

/// Attempt to schedule a message into the queue.
///
/// If the message is already in the queue then the earlier `request.run_at` takes precedence.
fn schedule_message<T: Eq + Hash + Clone>(
    queue: &mut DelayQueue<T>,
    scheduled: &mut HashMap<T, ScheduledEntry>,
    request: ScheduleRequest<T>,
) {
    match scheduled.entry(request.message) {
        Entry::Occupied(mut old_entry) if old_entry.get().run_at >= request.run_at => {
            // Old entry will run after the new request, so move it forward
            let entry = old_entry.get_mut();
            queue.reset_at(&entry.queue_key, request.run_at);
            entry.run_at = request.run_at;
        }
        Entry::Occupied(_old_entry) => {
            // Old entry will run before the new request, so ignore the new request
        }
        Entry::Vacant(entry) => {
            let message = entry.key().clone();
            entry.insert(ScheduledEntry {
                run_at: request.run_at,
                queue_key: queue.insert_at(message, request.run_at),
            });
        }
    }
}

impl<T: Eq + Hash + Clone> EventQueueProj<'_, T> {
    /// Attempt to retrieve a message from the queue.
    fn poll_pop_queue_message(&mut self, cx: &mut Context<'_>) -> Poll<Option<T>> {
        match self.queue.poll_expired(cx) {
            Poll::Ready(Some(expired)) => {
                let msg = expired.into_inner();
                self.scheduled.remove(&msg);
                Poll::Ready(Some(msg))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Stream for EventQueue<T>
where
    T: Eq + Hash + Clone,
{
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        while let Poll::Ready(Some(request)) = this.requests.as_mut().poll_next(cx) {
            schedule_message(this.queue, this.scheduled, request);
        }

        match this.poll_pop_queue_message(cx) {
            Poll::Ready(Some(msg)) => Poll::Ready(Some(msg)),
            Poll::Ready(None) => {
                if this.requests.is_terminated() {
                    // Every handle is gone and nothing is waiting, so we're done
                    Poll::Ready(None)
                } else {
                    // The delay queue is empty, but we may get more requests in the future...
                    Poll::Pending
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{event_queue, event_queue_with_backoff};
    use futures::{poll, FutureExt, StreamExt};
    use std::time::Duration;
    use tokio::time::{advance, pause};

    #[tokio::test]
    async fn queue_should_emit_items_as_requested() {
        pause();
        let (handle, mut queue) = event_queue::<u8>();
        handle.enqueue_after(1, Duration::from_secs(1));
        handle.enqueue_after(2, Duration::from_secs(3));
        assert!(poll!(queue.next()).is_pending());
        advance(Duration::from_secs(2)).await;
        assert_eq!(queue.next().now_or_never().unwrap().unwrap(), 1);
        assert!(poll!(queue.next()).is_pending());
        advance(Duration::from_secs(2)).await;
        assert_eq!(queue.next().now_or_never().unwrap().unwrap(), 2);
        drop(handle);
        // Stream has terminated
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn repeated_enqueue_collapses_to_one_item() {
        pause();
        let (handle, mut queue) = event_queue::<&str>();
        for _ in 0..10 {
            handle.enqueue("key");
        }
        assert_eq!(queue.next().await, Some("key"));
        assert!(poll!(queue.next()).is_pending());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn dedupe_should_keep_earlier_item() {
        pause();
        let (handle, mut queue) = event_queue::<()>();
        handle.enqueue_after((), Duration::from_secs(1));
        handle.enqueue_after((), Duration::from_secs(3));
        assert!(poll!(queue.next()).is_pending());
        assert_eq!(queue.len(), 1);
        advance(Duration::from_secs(2)).await;
        queue.next().now_or_never().unwrap().unwrap();
        drop(handle);
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn dedupe_should_replace_later_item() {
        pause();
        let (handle, mut queue) = event_queue::<()>();
        handle.enqueue_after((), Duration::from_secs(3));
        handle.enqueue_after((), Duration::from_secs(1));
        assert!(poll!(queue.next()).is_pending());
        advance(Duration::from_secs(2)).await;
        queue.next().now_or_never().unwrap().unwrap();
        drop(handle);
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn dedupe_should_allow_rescheduling_emitted_item() {
        pause();
        let (handle, mut queue) = event_queue::<()>();
        handle.enqueue_after((), Duration::from_secs(1));
        assert!(poll!(queue.next()).is_pending());
        advance(Duration::from_secs(2)).await;
        queue.next().now_or_never().unwrap().unwrap();
        assert!(poll!(queue.next()).is_pending());
        handle.enqueue_after((), Duration::from_secs(1));
        assert!(poll!(queue.next()).is_pending());
        advance(Duration::from_secs(2)).await;
        queue.next().now_or_never().unwrap().unwrap();
        assert!(poll!(queue.next()).is_pending());
    }

    #[tokio::test]
    async fn rate_limited_delay_is_monotonic_and_resets_on_forget() {
        pause();
        let (_handle, mut queue) = event_queue_with_backoff::<&str>(Duration::from_secs(1), Duration::from_secs(10));
        let delays: Vec<_> = (0..6).map(|_| queue.add_rate_limited("key")).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays.first(), Some(&Duration::from_secs(1)));
        assert_eq!(delays.last(), Some(&Duration::from_secs(10)));
        assert_eq!(queue.num_requeues(&"key"), 6);
        // still only one pending item, due at the earliest requested time
        assert_eq!(queue.len(), 1);

        queue.forget(&"key");
        assert_eq!(queue.num_requeues(&"key"), 0);
        assert_eq!(queue.add_rate_limited("key"), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn rate_limited_item_is_emitted_after_its_delay() {
        pause();
        let (_handle, mut queue) = event_queue_with_backoff::<&str>(Duration::from_secs(2), Duration::from_secs(60));
        queue.add_rate_limited("key");
        assert!(poll!(queue.next()).is_pending());
        advance(Duration::from_secs(1)).await;
        assert!(poll!(queue.next()).is_pending());
        advance(Duration::from_secs(2)).await;
        assert_eq!(queue.next().now_or_never().unwrap(), Some("key"));
    }
}
