//! Rate-limited batch scheduling.
//!
//! The comm transport sits on a fixed-size outbound socket queue. Going over
//! its limits silently drops messages instead of applying backpressure, so
//! the throttles have to be enforced here, above the transport:
//!
//! - `room`: at most this many jobs in flight (started, not yet finished)
//! - `rate`: at most this many job starts within any trailing `window`
//!
//! Jobs run as futures on the calling task; nothing is spawned.

use std::collections::VecDeque;
use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use log::debug;
use tokio::time::{sleep_until, Instant};

/// Rate window used unless overridden.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("room must be greater than zero")]
    ZeroRoom,

    #[error("rate must be greater than zero")]
    ZeroRate,

    #[error("rate window must be non-zero")]
    ZeroWindow,
}

/// The two throttles applied by [`run_batched`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub room: NonZeroUsize,
    pub rate: NonZeroUsize,
    pub window: Duration,
}

impl BatchLimits {
    pub fn new(room: usize, rate: usize) -> Result<Self, BatchError> {
        Ok(Self {
            room: NonZeroUsize::new(room).ok_or(BatchError::ZeroRoom)?,
            rate: NonZeroUsize::new(rate).ok_or(BatchError::ZeroRate)?,
            window: DEFAULT_WINDOW,
        })
    }

    pub fn with_window(mut self, window: Duration) -> Result<Self, BatchError> {
        if window.is_zero() {
            return Err(BatchError::ZeroWindow);
        }
        self.window = window;
        Ok(self)
    }
}

/// What a batch run observed about its own throttling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub started: usize,
    pub peak_in_flight: usize,
    pub peak_window_starts: usize,
}

/// Run `worker` over every input under `limits`.
///
/// Result `i` belongs to input `i`, whatever order the jobs finish in.
/// Worker outcomes are returned untouched: an `Err` from one job is that
/// slot's result and does not affect the others.
pub async fn run_batched<I, T, R, F, Fut>(inputs: I, worker: F, limits: BatchLimits) -> Vec<R>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    run_batched_with_stats(inputs, worker, limits).await.0
}

/// [`run_batched`], also returning the observed [`BatchStats`].
pub async fn run_batched_with_stats<I, T, R, F, Fut>(
    inputs: I,
    mut worker: F,
    limits: BatchLimits,
) -> (Vec<R>, BatchStats)
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    let room = limits.room.get();
    let rate = limits.rate.get();

    let mut pending = inputs.into_iter().enumerate().peekable();
    let mut in_flight = FuturesUnordered::new();
    // Start times inside the trailing window, oldest first
    let mut starts: VecDeque<Instant> = VecDeque::with_capacity(rate);
    let mut done: Vec<(usize, R)> = Vec::new();
    let mut stats = BatchStats::default();

    loop {
        let now = Instant::now();
        while starts
            .front()
            .is_some_and(|started| now.duration_since(*started) >= limits.window)
        {
            starts.pop_front();
        }

        while in_flight.len() < room && starts.len() < rate {
            let Some((index, input)) = pending.next() else {
                break;
            };
            starts.push_back(now);
            stats.started += 1;
            let job = worker(input);
            in_flight.push(async move { (index, job.await) });
        }
        stats.peak_in_flight = stats.peak_in_flight.max(in_flight.len());
        stats.peak_window_starts = stats.peak_window_starts.max(starts.len());

        if in_flight.is_empty() && pending.peek().is_none() {
            break;
        }

        // With room to spare, the only thing holding back the next input is
        // the rate window; wake when its oldest start expires.
        let waiting_on_rate = pending.peek().is_some() && in_flight.len() < room;
        let window_reopens = starts
            .front()
            .map(|started| *started + limits.window)
            .unwrap_or(now);

        tokio::select! {
            Some((index, result)) = in_flight.next(), if !in_flight.is_empty() => {
                done.push((index, result));
            }
            _ = sleep_until(window_reopens), if waiting_on_rate => {}
        }
    }

    debug!(
        "[batch] Finished {} jobs (peak in flight {}, peak starts per window {})",
        stats.started, stats.peak_in_flight, stats.peak_window_starts
    );

    done.sort_by_key(|(index, _)| *index);
    (done.into_iter().map(|(_, result)| result).collect(), stats)
}
