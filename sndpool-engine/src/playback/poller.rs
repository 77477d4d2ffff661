//! Playback poller thread
//!
//! Runs the engine's poll iteration at a fixed cadence on a dedicated OS
//! thread until shut down. The thread parks between iterations so shutdown
//! does not have to wait out a full interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Handle to a running poller thread
pub struct Poller {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Spawn the thread. `tick` runs once per `interval`.
    pub fn spawn<F>(interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_flag);

        let handle = thread::Builder::new()
            .name("sndpool-poller".to_string())
            .spawn(move || {
                info!("Playback poller started ({}ms interval)", interval.as_millis());
                let mut iterations = 0u64;
                let mut next = Instant::now();

                while !thread_stop.load(Ordering::Acquire) {
                    tick();
                    iterations += 1;

                    next += interval;
                    let now = Instant::now();
                    if next <= now {
                        // Fell behind; don't try to catch up with a burst of ticks
                        if now - next > interval {
                            debug!("Poller overran by {:?}", now - next);
                        }
                        next = now;
                        continue;
                    }
                    thread::park_timeout(next - now);
                    // Spurious wakeups are fine, park again until the deadline
                    while !thread_stop.load(Ordering::Acquire) {
                        let now = Instant::now();
                        if now >= next {
                            break;
                        }
                        thread::park_timeout(next - now);
                    }
                }
                info!("Playback poller stopped after {} iterations", iterations);
            })?;

        Ok(Self {
            stop_flag,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and wait for it to exit
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop_flag.store(true, Ordering::Release);
        handle.thread().unpark();
        if handle.join().is_err() {
            warn!("Playback poller thread panicked");
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
