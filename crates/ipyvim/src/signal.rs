//! Direct process signals for kernels that ignore protocol interrupts.
//!
//! This bypasses the kernel's control channel entirely and only works when
//! the kernel runs on the same POSIX host.

use std::fmt;

use crate::error::{Result, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlSignal::Interrupt => write!(f, "SIGINT"),
            ControlSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Delivers a control signal to a process id.
pub trait SignalSender {
    fn send_control_signal(&self, pid: u32, signal: ControlSignal) -> Result<()>;
}

/// Sends real signals with `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSignals;

#[cfg(unix)]
impl SignalSender for ProcessSignals {
    fn send_control_signal(&self, pid: u32, signal: ControlSignal) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw_pid = i32::try_from(pid).map_err(|_| SessionError::ProcessSignal {
            pid,
            reason: "pid out of range".to_string(),
        })?;
        let sig = match signal {
            ControlSignal::Interrupt => Signal::SIGINT,
            ControlSignal::Terminate => Signal::SIGTERM,
        };
        kill(Pid::from_raw(raw_pid), sig).map_err(|e| SessionError::ProcessSignal {
            pid,
            reason: e.to_string(),
        })
    }
}

#[cfg(not(unix))]
impl SignalSender for ProcessSignals {
    fn send_control_signal(&self, _pid: u32, _signal: ControlSignal) -> Result<()> {
        Err(SessionError::Unsupported("Sending process signals"))
    }
}
