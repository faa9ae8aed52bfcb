use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use tracing::debug;

use crate::domain::TimeLeft;

pub const TICK_PERIOD: StdDuration = StdDuration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub target: DateTime<Utc>,
    pub left: TimeLeft,
}

/// Recomputes the countdown to `target` once per period on a worker thread.
///
/// The worker stops when the handle is dropped or [`CountdownTicker::cancel`]
/// runs, and both wait for the thread to exit.
#[derive(Debug)]
pub struct CountdownTicker {
    target: DateTime<Utc>,
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CountdownTicker {
    pub fn start(target: DateTime<Utc>, period: StdDuration, out: Sender<Tick>) -> Self {
        let (stop, stopped) = bounded::<()>(0);
        debug!("starting countdown ticker for {target}");
        let worker = thread::spawn(move || run_ticker(target, period, &out, &stopped));
        Self {
            target,
            stop: Some(stop),
            worker: Some(worker),
        }
    }

    pub fn target(&self) -> DateTime<Utc> {
        self.target
    }

    pub fn cancel(&mut self) {
        // Dropping the sender disconnects the stop channel and wakes the worker.
        drop(self.stop.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
            debug!("stopped countdown ticker for {}", self.target);
        }
    }
}

impl Drop for CountdownTicker {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run_ticker(target: DateTime<Utc>, period: StdDuration, out: &Sender<Tick>, stopped: &Receiver<()>) {
    let ticks = tick(period);
    if !emit(target, out) {
        return;
    }

    loop {
        select! {
            recv(stopped) -> _ => break,
            recv(ticks) -> _ => {
                if !emit(target, out) {
                    break;
                }
            }
        }
    }
}

fn emit(target: DateTime<Utc>, out: &Sender<Tick>) -> bool {
    let left = TimeLeft::until(target, Utc::now());
    out.send(Tick { target, left }).is_ok()
}

/// Keeps at most one ticker alive, restarting it only when the target moves.
#[derive(Debug)]
pub struct CountdownSlot {
    period: StdDuration,
    out: Sender<Tick>,
    current: Option<CountdownTicker>,
}

impl CountdownSlot {
    pub fn new(period: StdDuration, out: Sender<Tick>) -> Self {
        Self {
            period,
            out,
            current: None,
        }
    }

    pub fn sync(&mut self, target: Option<DateTime<Utc>>) {
        if self.current.as_ref().map(CountdownTicker::target) == target {
            return;
        }

        // Stop the old worker before a new one can send.
        self.current = None;
        self.current = target.map(|target| CountdownTicker::start(target, self.period, self.out.clone()));
    }
}
