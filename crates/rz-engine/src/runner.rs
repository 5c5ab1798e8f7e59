//! Continuation runner
//!
//! Drives [`Pipeline3D::step`] on the tokio runtime. The task yields after
//! every chunk so other work keeps running, and sleeps with exponential
//! backoff while modules are still compiling.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rz_render::{GpuBackend, Pipeline3D, Step};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Delay sequence used while the pipeline waits for compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Current delay; the next one doubles, up to the maximum
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Step `generation` until the render is done
pub async fn drive<B>(
    pipeline: Arc<Mutex<Pipeline3D>>,
    backend: Arc<Mutex<B>>,
    generation: u64,
    mut backoff: Backoff,
) -> Step
where
    B: GpuBackend + Send + 'static,
{
    let mut chunks = 0u32;
    loop {
        let step = {
            let mut pipeline = pipeline.lock();
            let mut backend = backend.lock();
            pipeline.step(&mut *backend, generation)
        };
        match step {
            Step::Continue => {
                chunks += 1;
                backoff.reset();
                tokio::task::yield_now().await;
            }
            Step::Waiting => {
                let delay = backoff.next_delay();
                trace!(generation, ?delay, "Waiting for compilation");
                tokio::time::sleep(delay).await;
            }
            done => {
                debug!(generation, chunks, step = ?done, "Render task ended");
                return done;
            }
        }
    }
}

/// Run [`drive`] as a tokio task
pub fn spawn<B>(
    pipeline: Arc<Mutex<Pipeline3D>>,
    backend: Arc<Mutex<B>>,
    generation: u64,
    backoff: Backoff,
) -> JoinHandle<Step>
where
    B: GpuBackend + Send + 'static,
{
    tokio::spawn(drive(pipeline, backend, generation, backoff))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(5));
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(1));
    }

    #[test]
    fn test_backoff_initial_is_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }
}
