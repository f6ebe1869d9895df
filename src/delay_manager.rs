use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use rand::Rng;
use log::info;

const SLICE: Duration = Duration::from_millis(500);

/// Sleeps between requests and watches the stop flag raised by Ctrl-C.
#[derive(Clone, Default)]
pub struct DelayManager {
    stop: Arc<AtomicBool>,
    jitter_secs: u64,
}

impl DelayManager {
    pub fn new(jitter_secs: u64) -> Self {
        DelayManager {
            stop: Arc::new(AtomicBool::new(false)),
            jitter_secs,
        }
    }

    /// The flag to hand to a signal handler.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// `base` plus up to `jitter_secs` random seconds.
    pub fn jittered(&self, base: Duration) -> Duration {
        if self.jitter_secs == 0 {
            return base;
        }
        let mut rng = rand::thread_rng();
        base + Duration::from_secs(rng.gen_range(0..=self.jitter_secs))
    }

    /// Sleeps for `duration`, waking early on stop. Returns false if stopped.
    pub fn pause(&self, duration: Duration, label: &str) -> bool {
        if self.stop_requested() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }
        info!("Waiting for {} seconds ({})...", duration.as_secs(), label);

        let deadline = Instant::now() + duration;
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}
