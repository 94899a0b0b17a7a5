//! Editor liveness detection.
//!
//! Close/unload notifications from the editor context are best-effort and may
//! never arrive, so the parent also polls. Three probes are provided:
//!
//! 1. **Heartbeat** (primary): the editor writes `editorHeartbeat` on a cadence.
//!    Once the newest heartbeat is older than the timeout, the editor is dead.
//!    Before the first heartbeat the timeout runs from session start.
//! 2. **Session flag**: the editor writes `sessionOpen = closed` on teardown.
//! 3. **Process**: for an editor running as a separate process, `kill(pid, 0)`
//!    plus a start-time check, because operating systems reuse PIDs.
//!
//! [`LivenessMonitor`] rate-limits probing and reports the alive → dead
//! transition exactly once. It can be cancelled when the parent tears down.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use measview_protocol::SessionStatus;
use tracing::debug;

/// Signals gathered by the parent before asking a probe.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessContext {
    pub now: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub session_status: Option<SessionStatus>,
}

pub trait LivenessProbe {
    fn is_alive(&mut self, context: &LivenessContext) -> bool;
}

impl<F> LivenessProbe for F
where
    F: FnMut(&LivenessContext) -> bool,
{
    fn is_alive(&mut self, context: &LivenessContext) -> bool {
        self(context)
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatProbe {
    timeout: Duration,
}

impl HeartbeatProbe {
    pub fn new(timeout: StdDuration) -> Self {
        Self {
            timeout: Duration::from_std(timeout).unwrap_or(Duration::MAX),
        }
    }
}

impl LivenessProbe for HeartbeatProbe {
    fn is_alive(&mut self, context: &LivenessContext) -> bool {
        let last = context
            .last_heartbeat
            .map_or(context.started_at, |heartbeat| heartbeat.max(context.started_at));
        context.now.signed_duration_since(last) <= self.timeout
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionFlagProbe;

impl LivenessProbe for SessionFlagProbe {
    fn is_alive(&mut self, context: &LivenessContext) -> bool {
        context.session_status != Some(SessionStatus::Closed)
    }
}

/// Watches an editor process by PID.
#[derive(Debug, Clone)]
pub struct ProcessProbe {
    pid: u32,
    proc_started: Option<u64>,
}

impl ProcessProbe {
    /// Captures the process start time now so a recycled PID reads as dead later.
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            proc_started: get_process_start_time(pid),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The original process still holds the PID.
    pub fn is_running(&self) -> bool {
        if !is_pid_alive(self.pid) {
            return false;
        }
        match self.proc_started {
            Some(expected) => get_process_start_time(self.pid) == Some(expected),
            None => true,
        }
    }
}

impl LivenessProbe for ProcessProbe {
    fn is_alive(&mut self, _context: &LivenessContext) -> bool {
        self.is_running()
    }
}

/// Alive only while every inner probe reports alive.
#[derive(Default)]
pub struct AllAlive {
    probes: Vec<Box<dyn LivenessProbe>>,
}

impl AllAlive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, probe: impl LivenessProbe + 'static) -> Self {
        self.probes.push(Box::new(probe));
        self
    }
}

impl LivenessProbe for AllAlive {
    fn is_alive(&mut self, context: &LivenessContext) -> bool {
        self.probes.iter_mut().all(|probe| probe.is_alive(context))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Watching,
    Dead,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    interval: Duration,
    next_check: Option<DateTime<Utc>>,
    state: MonitorState,
}

impl LivenessMonitor {
    pub fn new(interval: StdDuration) -> Self {
        Self {
            interval: Duration::from_std(interval).unwrap_or(Duration::MAX),
            next_check: None,
            state: MonitorState::Watching,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn cancel(&mut self) {
        if self.state == MonitorState::Watching {
            self.state = MonitorState::Cancelled;
        }
    }

    /// Probes if the interval has elapsed. Returns `true` only on the call that
    /// observes the transition to dead.
    pub fn poll(&mut self, probe: &mut dyn LivenessProbe, context: &LivenessContext) -> bool {
        if self.state != MonitorState::Watching {
            return false;
        }
        if let Some(next) = self.next_check {
            if context.now < next {
                return false;
            }
        }
        self.next_check = context.now.checked_add_signed(self.interval);

        if probe.is_alive(context) {
            return false;
        }
        debug!("Editor liveness lost");
        self.state = MonitorState::Dead;
        true
    }
}

/// Blocks, checking `is_alive` every `interval`, until it reports dead (then
/// calls `on_dead` once) or `cancel` is set.
pub fn poll_liveness<A, D>(interval: StdDuration, mut is_alive: A, on_dead: D, cancel: &AtomicBool)
where
    A: FnMut() -> bool,
    D: FnOnce(),
{
    while !cancel.load(Ordering::Relaxed) {
        if !is_alive() {
            on_dead();
            return;
        }
        thread::sleep(interval);
    }
}

pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

// Per-thread sysinfo handle; refreshing a single PID avoids a full process scan.
thread_local! {
    static SYSTEM_CACHE: RefCell<Option<sysinfo::System>> = const { RefCell::new(None) };
}

/// Start time of a process (Unix timestamp), or None if it does not exist.
pub fn get_process_start_time(pid: u32) -> Option<u64> {
    use sysinfo::{Pid, ProcessRefreshKind, System};

    SYSTEM_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        let sys = cache.get_or_insert_with(System::new);
        let sys_pid = Pid::from(pid as usize);
        sys.refresh_process_specifics(sys_pid, ProcessRefreshKind::new());
        sys.process(sys_pid).map(|process| process.start_time())
    })
}
