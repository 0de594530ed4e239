//! Loop threads.
//!
//! Every long-running component runs as `on_start -> loop { tick, wait } ->
//! on_stop` on its own OS thread. The stop flag is checked between ticks, so
//! stopping lets the current tick finish. A wake signal cuts the idle wait
//! short when new work is queued.

use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::Result;

/// Edge-triggered wake event.
#[derive(Debug, Default)]
pub struct Wakeup {
    pending: Mutex<bool>,
    signal: Condvar,
}

impl Wakeup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wake(&self) {
        *self.pending.lock() = true;
        self.signal.notify_all();
    }

    /// Wait up to `timeout` for a wake. Returns true if woken.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if !*pending && !timeout.is_zero() {
            self.signal.wait_for(&mut pending, timeout);
        }
        std::mem::replace(&mut *pending, false)
    }
}

/// Stop flag plus wake event owned by one loop.
#[derive(Debug, Default)]
pub struct LoopControl {
    stop: AtomicBool,
    wakeup: Wakeup,
}

impl LoopControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wakeup.wake();
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn wake(&self) {
        self.wakeup.wake();
    }

    pub fn wait(&self, timeout: Duration) -> bool {
        self.wakeup.wait(timeout)
    }
}

pub trait LoopWorker: Send + 'static {
    fn name(&self) -> &'static str;

    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// One unit of work. An error ends the loop.
    fn tick(&mut self) -> Result<()>;

    /// How long to wait between ticks when not woken.
    fn idle(&self) -> Duration;

    fn on_stop(&mut self) {}
}

/// Running loop thread.
#[derive(Debug)]
pub struct LoopHandle {
    name: &'static str,
    control: Arc<LoopControl>,
    thread: Option<JoinHandle<()>>,
}

impl LoopHandle {
    pub fn spawn<W: LoopWorker>(mut worker: W, control: Arc<LoopControl>) -> Result<Self> {
        let name = worker.name();
        let loop_control = control.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(&mut worker, &loop_control))?;
        Ok(Self {
            name,
            control,
            thread: Some(thread),
        })
    }

    pub fn control(&self) -> &Arc<LoopControl> {
        &self.control
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop and wait for it to finish.
    pub fn stop(&mut self) {
        self.control.request_stop();
        if let Some(thread) = self.thread.take() {
            if let Err(e) = thread.join() {
                warn!("{} thread panicked: {:?}", self.name, e);
            }
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<W: LoopWorker>(worker: &mut W, control: &LoopControl) {
    let name = worker.name();
    info!("{} thread started", name);

    match catch_unwind(AssertUnwindSafe(|| worker.on_start())) {
        Ok(Ok(())) => {
            while !control.should_stop() {
                match catch_unwind(AssertUnwindSafe(|| worker.tick())) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("critical: {} tick failed: {}", name, e);
                        break;
                    }
                    Err(_) => {
                        error!("critical: {} tick panicked", name);
                        break;
                    }
                }
                if control.should_stop() {
                    break;
                }
                control.wait(worker.idle());
            }
        }
        Ok(Err(e)) => error!("critical: {} failed to start: {}", name, e),
        Err(_) => error!("critical: {} panicked while starting", name),
    }

    if catch_unwind(AssertUnwindSafe(|| worker.on_stop())).is_err() {
        error!("{} panicked while stopping", name);
    }
    info!("{} thread exiting", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct Counter {
        ticks: Arc<AtomicUsize>,
        stopped: Arc<AtomicBool>,
        fail_at: Option<usize>,
    }

    impl LoopWorker for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn tick(&mut self) -> Result<()> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(n) == self.fail_at {
                return Err(NetworkError::Concern("boom".into()));
            }
            Ok(())
        }

        fn idle(&self) -> Duration {
            Duration::from_secs(60)
        }

        fn on_stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn counter(fail_at: Option<usize>) -> (Counter, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let worker = Counter {
            ticks: ticks.clone(),
            stopped: stopped.clone(),
            fail_at,
        };
        (worker, ticks, stopped)
    }

    fn wait_until(deadline: Duration, f: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        f()
    }

    #[test]
    fn wake_cuts_idle_wait_short() {
        let (worker, ticks, stopped) = counter(None);
        let mut handle = LoopHandle::spawn(worker, LoopControl::new()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || ticks.load(Ordering::SeqCst) == 1));

        handle.control().wake();
        assert!(wait_until(Duration::from_secs(5), || ticks.load(Ordering::SeqCst) >= 2));

        handle.stop();
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!handle.is_running());
    }

    #[test]
    fn tick_error_terminates_cleanly() {
        let (worker, ticks, stopped) = counter(Some(1));
        let handle = LoopHandle::spawn(worker, LoopControl::new()).unwrap();
        assert!(wait_until(Duration::from_secs(5), || !handle.is_running()));
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn wakeup_with_zero_timeout_does_not_block() {
        let wakeup = Wakeup::new();
        assert!(!wakeup.wait(Duration::ZERO));
        wakeup.wake();
        assert!(wakeup.wait(Duration::ZERO));
        assert!(!wakeup.wait(Duration::ZERO));
    }
}
