//! Fixed-rate step driver.
//!
//! - `SimClock`: simulation time, advanced by the nominal interval per step
//! - `TickPacer`: drift-corrected deadlines with no catch-up bursts
//! - `TickScheduler`: background thread that calls the step function

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{RecvTimeoutError, Sender};

/// Simulation time. Independent of wall-clock jitter: every step advances it
/// by exactly `step_ms`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SimClock {
    tick: u64,
    now_ms: u64,
    step_ms: u64,
}

impl SimClock {
    #[must_use]
    pub fn new(step_ms: u64) -> Self {
        Self {
            tick: 0,
            now_ms: 0,
            step_ms,
        }
    }

    /// Move to the next tick; returns its number (first tick is 1).
    pub fn advance(&mut self) -> u64 {
        self.tick += 1;
        self.now_ms = self.now_ms.saturating_add(self.step_ms);
        self.tick
    }

    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    #[must_use]
    pub fn step_ms(&self) -> u64 {
        self.step_ms
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Pace {
    /// How long to sleep before the next step.
    pub wait: Duration,
    /// The step ran past its deadline.
    pub overrun: bool,
}

/// Deadlines advance from the previous deadline, not from when a step ended,
/// so jitter does not accumulate. An overrun rebases the deadline to the
/// moment it was noticed: the next step starts at once and the cadence
/// resumes from there.
#[derive(Copy, Clone, Debug)]
pub struct TickPacer {
    interval: Duration,
    deadline: Instant,
}

impl TickPacer {
    /// The first step is due at `start`.
    #[must_use]
    pub fn new(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            deadline: start,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Call once after each step with the current time.
    pub fn next_wait(&mut self, now: Instant) -> Pace {
        self.deadline += self.interval;
        if self.deadline <= now {
            self.deadline = now;
            Pace {
                wait: Duration::ZERO,
                overrun: true,
            }
        } else {
            Pace {
                wait: self.deadline - now,
                overrun: false,
            }
        }
    }
}

/// Runs `step(tick)` on its own thread every `interval` until stopped.
#[derive(Debug)]
pub struct TickScheduler {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    ticks: Arc<AtomicU64>,
}

impl TickScheduler {
    /// Start the driver thread. Tick numbers start at 1 and increase by one
    /// per invocation. A panicking step is logged and the loop continues.
    pub fn start<F>(interval: Duration, mut step: F) -> Result<Self>
    where
        F: FnMut(u64) + Send + 'static,
    {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&ticks);
        let handle = thread::Builder::new()
            .name("tick-scheduler".to_string())
            .spawn(move || {
                let mut pacer = TickPacer::new(interval, Instant::now());
                let mut tick = 0u64;
                loop {
                    tick += 1;
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| step(tick))) {
                        log::error!(
                            "scheduler: tick {tick} panicked: {}",
                            crate::fault::panic_message(payload.as_ref())
                        );
                        metrics::counter!("server.errors_total", "site" => "tick").increment(1);
                    }
                    counter.store(tick, Ordering::Release);
                    let pace = pacer.next_wait(Instant::now());
                    if pace.overrun {
                        log::debug!("scheduler: tick {tick} overran {:?}", pacer.interval());
                        metrics::counter!("tick.overruns_total").increment(1);
                    }
                    match stop_rx.recv_timeout(pace.wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::info!("scheduler: stopped after {tick} ticks");
            })
            .context("spawn tick scheduler thread")?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            ticks,
        })
    }

    /// Ticks completed so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Halt the loop after the current step and join the thread.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
        if let Some(h) = self.handle.take()
            && h.join().is_err()
        {
            log::error!("scheduler: driver thread panicked");
        }
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn sim_clock_advances_by_nominal_step() {
        let mut c = SimClock::new(50);
        assert_eq!(c.advance(), 1);
        assert_eq!(c.advance(), 2);
        assert_eq!(c.now_ms(), 100);
        assert_eq!(c.tick(), 2);
    }

    #[test]
    fn pacer_corrects_drift() {
        let t0 = Instant::now();
        let ms = Duration::from_millis;
        let mut p = TickPacer::new(ms(50), t0);
        // Step took 10 ms: sleep the remaining 40.
        assert_eq!(p.next_wait(t0 + ms(10)).wait, ms(40));
        // Woke 3 ms late and took 5 ms: the deadline still lands on t0 + 100.
        let pace = p.next_wait(t0 + ms(58));
        assert_eq!(pace.wait, ms(42));
        assert!(!pace.overrun);
    }

    #[test]
    fn overrun_fires_once_then_resumes_cadence() {
        let t0 = Instant::now();
        let ms = Duration::from_millis;
        let mut p = TickPacer::new(ms(50), t0);
        // Step took 2x the interval.
        let pace = p.next_wait(t0 + ms(100));
        assert!(pace.overrun);
        assert_eq!(pace.wait, Duration::ZERO);
        // The immediate follow-up step was quick: back to a normal wait, not a
        // second zero-wait catch-up.
        let pace = p.next_wait(t0 + ms(105));
        assert!(!pace.overrun);
        assert_eq!(pace.wait, ms(45));
    }

    #[test]
    fn ticks_are_monotonic_and_survive_panics() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let mut s = TickScheduler::start(Duration::from_millis(1), move |tick| {
            log.lock().expect("lock").push(tick);
            assert!(tick != 3, "tick 3 fails");
        })
        .expect("start");
        let deadline = Instant::now() + Duration::from_secs(5);
        while s.ticks() < 6 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        s.stop();
        let seen = seen.lock().expect("lock").clone();
        assert!(seen.len() >= 6, "only {} ticks", seen.len());
        for (i, t) in seen.iter().enumerate() {
            assert_eq!(*t, i as u64 + 1);
        }
    }
}
