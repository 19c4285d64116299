//! Injectable time source.
//!
//! The watchdog, firmware pipeline and poll-control coordinator all schedule
//! work relative to "now" and need to be driven by virtual time in tests
//! (see the comm-fail transition scenario, which asserts behavior after
//! advancing 5.001s of simulated time without a real sleep). `SystemClock`
//! is the production implementation built directly on `tokio::time`;
//! `MockClock` lets tests advance time deterministically and in
//! registration order.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> Sleep;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}

struct SleepState {
    wake_at_micros: u64,
    completed: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

struct MockClockInner {
    origin: Instant,
    elapsed_micros: AtomicU64,
    sleepers: Mutex<Vec<Arc<SleepState>>>,
}

/// Deterministic virtual clock. `now()` is `origin + elapsed`; `advance`
/// moves `elapsed` forward and wakes every sleeper whose deadline has
/// passed, in the order they were registered.
#[derive(Clone)]
pub struct MockClock {
    inner: Arc<MockClockInner>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    pub fn new() -> Self {
        MockClock {
            inner: Arc::new(MockClockInner {
                origin: Instant::now(),
                elapsed_micros: AtomicU64::new(0),
                sleepers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Moves virtual time forward by `delta` and wakes any sleeper whose
    /// deadline is now in the past, in registration order.
    pub fn advance(&self, delta: Duration) {
        let new_elapsed = self
            .inner
            .elapsed_micros
            .fetch_add(delta.as_micros() as u64, Ordering::SeqCst)
            + delta.as_micros() as u64;

        let sleepers = self.inner.sleepers.lock().unwrap();
        for sleeper in sleepers.iter() {
            if sleeper.wake_at_micros <= new_elapsed && !sleeper.completed.swap(true, Ordering::SeqCst) {
                if let Some(waker) = sleeper.waker.lock().unwrap().take() {
                    waker.wake();
                }
            }
        }
    }

    fn elapsed(&self) -> Duration {
        Duration::from_micros(self.inner.elapsed_micros.load(Ordering::SeqCst))
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.inner.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        let wake_at_micros = self.elapsed().as_micros() as u64 + duration.as_micros() as u64;
        let state = Arc::new(SleepState {
            wake_at_micros,
            completed: AtomicBool::new(duration.is_zero()),
            waker: Mutex::new(None),
        });
        self.inner.sleepers.lock().unwrap().push(state.clone());
        Box::pin(MockSleep { state })
    }
}

struct MockSleep {
    state: Arc<SleepState>,
}

impl Future for MockSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.state.completed.load(Ordering::SeqCst) {
            return Poll::Ready(());
        }
        let mut waker_slot = self.state.waker.lock().unwrap();
        let needs_store = match waker_slot.as_ref() {
            Some(existing) => !existing.will_wake(cx.waker()),
            None => true,
        };
        if needs_store {
            *waker_slot = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_clock_wakes_sleeper_after_advance() {
        let clock = MockClock::new();
        let start = clock.now();
        let sleeper = clock.sleep(Duration::from_millis(5000));
        let handle = tokio::spawn(sleeper);

        tokio::task::yield_now().await;
        clock.advance(Duration::from_millis(5001));
        handle.await.unwrap();

        assert!(clock.now() >= start + Duration::from_millis(5001));
    }

    #[tokio::test]
    async fn mock_clock_does_not_wake_before_deadline() {
        let clock = MockClock::new();
        let sleeper = clock.sleep(Duration::from_millis(5000));
        let mut handle = tokio::spawn(sleeper);

        clock.advance(Duration::from_millis(1000));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(futures_poll_pending(&mut handle));
    }

    fn futures_poll_pending(handle: &mut tokio::task::JoinHandle<()>) -> bool {
        use std::task::{RawWaker, RawWakerVTable};
        fn noop(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        let raw = RawWaker::new(std::ptr::null(), &VTABLE);
        let waker = unsafe { Waker::from_raw(raw) };
        let mut cx = Context::from_waker(&waker);
        matches!(Pin::new(handle).poll(&mut cx), Poll::Pending)
    }
}
