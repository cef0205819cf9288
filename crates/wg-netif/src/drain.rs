//! Deferred engine teardown
//!
//! Closing an interface detaches its engine immediately, then hands it to a
//! background thread that waits for in-flight handshakes and transfers to
//! settle before releasing the engine's sockets and tun device.

use crate::backend::Engine;
use serde::{Deserialize, Serialize};
use std::io;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Drain timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    /// How often to sample engine load
    pub poll_interval: Duration,
    /// Continuous idle time after which the engine is closed
    pub idle_threshold: Duration,
    /// Upper bound on the whole drain
    pub max_wait: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            idle_threshold: Duration::from_secs(10),
            max_wait: Duration::from_secs(60),
        }
    }
}

/// Why a drained engine was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Stayed idle for the idle threshold
    Idle,
    /// Hit the maximum wait while still busy
    TimedOut,
}

/// Block until `engine` has been idle long enough or `max_wait` elapses,
/// then close it.
pub fn wait_for_no_load<E: Engine + ?Sized>(engine: &E, config: &DrainConfig) -> DrainOutcome {
    let step = config.poll_interval.max(Duration::from_millis(1));
    let mut waited = Duration::ZERO;
    let mut idle = Duration::ZERO;

    loop {
        thread::sleep(step);
        waited += step;
        idle += step;

        if engine.is_under_load() {
            idle = Duration::ZERO;
        }

        if idle >= config.idle_threshold {
            engine.close();
            return DrainOutcome::Idle;
        }
        if waited >= config.max_wait {
            engine.close();
            return DrainOutcome::TimedOut;
        }
    }
}

/// Owns an engine on its way out; closes it if dropped before draining.
struct DrainGuard<E: Engine> {
    engine: E,
    closed: bool,
}

impl<E: Engine> DrainGuard<E> {
    fn run(&mut self, config: &DrainConfig) -> DrainOutcome {
        let outcome = wait_for_no_load(&self.engine, config);
        self.closed = true;
        outcome
    }
}

impl<E: Engine> Drop for DrainGuard<E> {
    fn drop(&mut self) {
        if !self.closed {
            self.engine.close();
        }
    }
}

/// Drain `engine` on a background thread.
///
/// The thread takes sole ownership of the engine. If the thread cannot be
/// spawned the engine is closed before the error is returned.
pub fn spawn_drain<E: Engine>(engine: E, config: DrainConfig) -> io::Result<thread::JoinHandle<DrainOutcome>> {
    let mut guard = DrainGuard { engine, closed: false };

    thread::Builder::new()
        .name("wg-drain".to_string())
        .spawn(move || {
            debug!("Draining engine");
            let started = Instant::now();
            let outcome = guard.run(&config);
            info!("Engine closed ({:?}) after {:?}", outcome, started.elapsed());
            outcome
        })
}
