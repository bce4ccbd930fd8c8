//! Controlled process state
//!
//! The whole state lives in one `AtomicU64`:
//!
//! ```text
//!  63                    8   4   3   2   0
//! +-----------------------+---+---+-------+
//! |        version        |rst|rld| phase |
//! +-----------------------+---+---+-------+
//! ```
//!
//! Every effective transition bumps the version. Requiring a reload or
//! restart hands out a [`Stamp`] holding the version that transition
//! produced; reverting with that stamp is a compare-and-swap that only
//! succeeds while the version is unchanged, so a stale revert can never undo
//! a newer requirement.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const PHASE_MASK: u64 = 0b111;
const RELOAD_FLAG: u64 = 1 << 3;
const RESTART_FLAG: u64 = 1 << 4;
const VERSION_SHIFT: u32 = 8;
const FLAGS_MASK: u64 = (1 << VERSION_SHIFT) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl Phase {
    fn from_bits(bits: u64) -> Self {
        match bits & PHASE_MASK {
            0 => Phase::Starting,
            1 => Phase::Running,
            2 => Phase::Stopping,
            _ => Phase::Stopped,
        }
    }
}

/// Observable process state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum State {
    /// Booting or reloading
    Starting,
    /// Running with configuration applied
    Running,
    /// Running; persisted configuration waits for a reload
    ReloadRequired,
    /// Running; persisted configuration waits for a full restart
    RestartRequired,
    /// Shutting down
    Stopping,
    /// Shut down
    Stopped,
}

impl State {
    /// Whether a reload or restart is pending
    pub fn requires_action(self) -> bool {
        matches!(self, State::ReloadRequired | State::RestartRequired)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Starting => "starting",
            State::Running => "running",
            State::ReloadRequired => "reload-required",
            State::RestartRequired => "restart-required",
            State::Stopping => "stopping",
            State::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Token returned by a reload/restart requirement, used to revert it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    version: u64,
    effective: bool,
}

impl Stamp {
    /// Whether the call that produced this stamp changed the state.
    ///
    /// A requirement that was already pending yields an inert stamp, so
    /// reverting it leaves the earlier requirement alone.
    pub fn is_effective(&self) -> bool {
        self.effective
    }
}

/// Process-wide lifecycle state with revertible reload/restart requirements
#[derive(Debug)]
pub struct ControlledProcessState {
    bits: AtomicU64,
    reload_supported: bool,
}

impl Default for ControlledProcessState {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ControlledProcessState {
    /// A fresh process in `Starting`. Constructing a new instance is the
    /// only way restart-required is ever cleared.
    pub fn new(reload_supported: bool) -> Self {
        Self {
            bits: AtomicU64::new(Phase::Starting as u64),
            reload_supported,
        }
    }

    /// Whether reload requests are honoured; if not they become restarts
    pub fn reload_supported(&self) -> bool {
        self.reload_supported
    }

    /// Current observable state
    pub fn state(&self) -> State {
        Self::decode(self.bits.load(Ordering::Acquire))
    }

    fn decode(bits: u64) -> State {
        match Phase::from_bits(bits) {
            Phase::Starting | Phase::Running if bits & RESTART_FLAG != 0 => State::RestartRequired,
            Phase::Starting | Phase::Running if bits & RELOAD_FLAG != 0 => State::ReloadRequired,
            Phase::Starting => State::Starting,
            Phase::Running => State::Running,
            Phase::Stopping => State::Stopping,
            Phase::Stopped => State::Stopped,
        }
    }

    /// Apply `f` to the flag/phase bits; bumps the version if they changed.
    /// Returns the new word if anything changed.
    fn update(&self, f: impl Fn(u64) -> u64) -> Option<u64> {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let flags = f(current & FLAGS_MASK) & FLAGS_MASK;
            if flags == current & FLAGS_MASK {
                return None;
            }
            let version = (current >> VERSION_SHIFT).wrapping_add(1);
            let next = (version << VERSION_SHIFT) | flags;
            match self
                .bits
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(next),
                Err(actual) => current = actual,
            }
        }
    }

    fn set_phase(&self, phase: Phase, clear: u64) {
        let before = self.state();
        self.update(|flags| (flags & !PHASE_MASK & !clear) | phase as u64);
        debug!("Process state {} -> {}", before, self.state());
    }

    /// Enter `Starting`; a reload clears reload-required, never restart-required
    pub fn set_starting(&self) {
        self.set_phase(Phase::Starting, RELOAD_FLAG);
    }

    /// Enter `Running`; pending requirements are kept
    pub fn set_running(&self) {
        self.set_phase(Phase::Running, 0);
    }

    /// Enter `Stopping`
    pub fn set_stopping(&self) {
        self.set_phase(Phase::Stopping, 0);
    }

    /// Enter `Stopped`
    pub fn set_stopped(&self) {
        self.set_phase(Phase::Stopped, 0);
    }

    /// Require a reload. Falls back to a restart when reloads are unsupported.
    pub fn set_reload_required(&self) -> Stamp {
        if !self.reload_supported {
            return self.set_restart_required();
        }
        self.require(RELOAD_FLAG)
    }

    /// Require a restart
    pub fn set_restart_required(&self) -> Stamp {
        self.require(RESTART_FLAG)
    }

    fn require(&self, flag: u64) -> Stamp {
        match self.update(|flags| flags | flag) {
            Some(next) => {
                info!("Process state is now {}", Self::decode(next));
                Stamp {
                    version: next >> VERSION_SHIFT,
                    effective: true,
                }
            }
            None => Stamp {
                version: self.bits.load(Ordering::Acquire) >> VERSION_SHIFT,
                effective: false,
            },
        }
    }

    /// Undo [`set_reload_required`](Self::set_reload_required) if nothing
    /// changed since. Returns whether the revert took effect.
    pub fn revert_reload_required(&self, stamp: Stamp) -> bool {
        let flag = if self.reload_supported {
            RELOAD_FLAG
        } else {
            RESTART_FLAG
        };
        self.revert(stamp, flag)
    }

    /// Undo [`set_restart_required`](Self::set_restart_required) if nothing
    /// changed since. Returns whether the revert took effect.
    pub fn revert_restart_required(&self, stamp: Stamp) -> bool {
        self.revert(stamp, RESTART_FLAG)
    }

    fn revert(&self, stamp: Stamp, flag: u64) -> bool {
        if !stamp.effective {
            return false;
        }
        let current = self.bits.load(Ordering::Acquire);
        if current >> VERSION_SHIFT != stamp.version {
            debug!("Stale process state stamp; revert skipped");
            return false;
        }
        let version = stamp.version.wrapping_add(1);
        let next = (version << VERSION_SHIFT) | (current & FLAGS_MASK & !flag);
        let reverted = self
            .bits
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if reverted {
            info!("Process state reverted to {}", Self::decode(next));
        }
        reverted
    }
}
