use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::sleep;

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Timeout,
    Interval,
    AnimationFrame,
}

impl TimerKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "timeout" => Some(Self::Timeout),
            "interval" => Some(Self::Interval),
            "frame" => Some(Self::AnimationFrame),
            _ => None,
        }
    }

    fn repeating(self) -> bool {
        matches!(self, TimerKind::Interval)
    }
}

struct TimerEntry {
    kind: TimerKind,
    task: JoinHandle<()>,
}

/// Script timers for one runtime thread.
///
/// Each timer is a tokio task that reports its id on `fired_tx` when due; the
/// runtime loop owns the receiving end and invokes the script callback. While
/// paused, repeating timers skip their ticks and one-shot timers stay queued
/// until the loop resumes reading.
pub struct TimerManager {
    handle: Handle,
    start: Instant,
    next_id: Cell<u32>,
    timers: RefCell<HashMap<u32, TimerEntry>>,
    fired_tx: UnboundedSender<u32>,
    paused: Arc<AtomicBool>,
}

impl TimerManager {
    pub fn new(handle: Handle, fired_tx: UnboundedSender<u32>) -> Self {
        Self {
            handle,
            start: Instant::now(),
            next_id: Cell::new(1),
            timers: RefCell::new(HashMap::new()),
            fired_tx,
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Milliseconds since the runtime started, passed to frame callbacks.
    pub fn timestamp_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1_000.0
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn register(&self, delay_ms: f64, kind: TimerKind) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1).max(1));

        let mut duration = if delay_ms.is_finite() && delay_ms > 0.0 {
            Duration::from_secs_f64(delay_ms / 1_000.0)
        } else {
            Duration::ZERO
        };
        if kind == TimerKind::AnimationFrame {
            duration = FRAME_INTERVAL;
        }
        if kind.repeating() && duration.is_zero() {
            duration = Duration::from_millis(1);
        }

        let tx = self.fired_tx.clone();
        let task = if kind.repeating() {
            let paused = Arc::clone(&self.paused);
            self.handle.spawn(async move {
                loop {
                    sleep(duration).await;
                    if paused.load(Ordering::Acquire) {
                        continue;
                    }
                    if tx.send(id).is_err() {
                        break;
                    }
                }
            })
        } else {
            self.handle.spawn(async move {
                sleep(duration).await;
                let _ = tx.send(id);
            })
        };

        self.timers
            .borrow_mut()
            .insert(id, TimerEntry { kind, task });
        id
    }

    pub fn clear(&self, id: u32) {
        if let Some(entry) = self.timers.borrow_mut().remove(&id) {
            entry.task.abort();
        }
    }

    /// Resolve a fired id. One-shot timers are forgotten here; `None` means
    /// the timer was cleared after it fired.
    pub fn take_fired(&self, id: u32) -> Option<TimerKind> {
        let mut timers = self.timers.borrow_mut();
        let kind = timers.get(&id)?.kind;
        if !kind.repeating() {
            timers.remove(&id);
        }
        Some(kind)
    }

    pub fn clear_all(&self) {
        for (_, entry) in self.timers.borrow_mut().drain() {
            entry.task.abort();
        }
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.clear_all();
    }
}
