//! Scripted in-memory kernel used by the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use ipyvim::client::KernelClient;
use ipyvim::error::{Result, SessionError};
use ipyvim::message::{Notification, Reply};
use ipyvim::signal::{ControlSignal, SignalSender};
use ipyvim::{Config, KernelSession};
use jupyter_protocol::ExecuteRequest;

/// A request the scripted kernel received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Execute {
        code: String,
        silent: bool,
        user_expressions: Option<HashMap<String, String>>,
    },
    Complete {
        code: String,
        cursor_pos: usize,
    },
}

/// What the kernel will answer, and what it has seen so far.
#[derive(Debug, Default)]
pub struct Script {
    /// Broadcast messages, delivered in order
    pub broadcasts: VecDeque<Notification>,
    /// Replies handed out to successive waits; an empty queue times out
    pub replies: VecDeque<Reply>,
    pub fail_sends: bool,
    pub sent: Vec<Sent>,
    pub reply_waits: Vec<String>,
    pub interrupts: usize,
    pub shutdowns: usize,
}

pub type SharedScript = Rc<RefCell<Script>>;

pub struct ScriptedClient {
    script: SharedScript,
    next_id: usize,
}

impl ScriptedClient {
    pub fn new(script: SharedScript) -> Self {
        Self { script, next_id: 0 }
    }

    fn record(&mut self, sent: Sent) -> Result<String> {
        let mut script = self.script.borrow_mut();
        if script.fail_sends {
            return Err(SessionError::Transport("socket closed".into()));
        }
        script.sent.push(sent);
        self.next_id += 1;
        Ok(format!("msg-{}", self.next_id))
    }
}

impl KernelClient for ScriptedClient {
    fn execute(&mut self, request: ExecuteRequest) -> Result<String> {
        self.record(Sent::Execute {
            code: request.code,
            silent: request.silent,
            user_expressions: request.user_expressions,
        })
    }

    fn complete(&mut self, code: &str, cursor_pos: usize) -> Result<String> {
        self.record(Sent::Complete {
            code: code.to_string(),
            cursor_pos,
        })
    }

    fn broadcast_message(&mut self, _timeout: Duration) -> Option<Notification> {
        self.script.borrow_mut().broadcasts.pop_front()
    }

    fn pending_broadcasts(&mut self) -> Vec<Notification> {
        self.script.borrow_mut().broadcasts.drain(..).collect()
    }

    fn reply_message(&mut self, request_id: &str, _timeout: Duration) -> Option<Reply> {
        let mut script = self.script.borrow_mut();
        script.reply_waits.push(request_id.to_string());
        script.replies.pop_front()
    }

    fn interrupt(&mut self) -> Result<()> {
        self.script.borrow_mut().interrupts += 1;
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.script.borrow_mut().shutdowns += 1;
        Ok(())
    }
}

/// Records delivered signals, optionally failing every delivery.
#[derive(Debug, Default, Clone)]
pub struct RecordingSignals {
    pub delivered: Rc<RefCell<Vec<(u32, ControlSignal)>>>,
    pub fail: bool,
}

impl SignalSender for RecordingSignals {
    fn send_control_signal(&self, pid: u32, signal: ControlSignal) -> Result<()> {
        if self.fail {
            return Err(SessionError::ProcessSignal {
                pid,
                reason: "ESRCH: No such process".into(),
            });
        }
        self.delivered.borrow_mut().push((pid, signal));
        Ok(())
    }
}

/// Test config with short waits.
pub fn test_config() -> Config {
    Config {
        poll_timeout_ms: 10,
        reply_timeout_ms: 10,
        complete_timeout_ms: 10,
        ..Config::default()
    }
}

/// A session already connected to a scripted kernel.
pub fn connected_session(config: &Config, signals: RecordingSignals) -> (KernelSession, SharedScript) {
    let script: SharedScript = Rc::default();
    let mut session = KernelSession::with_signals(config, Box::new(signals));
    let client = ScriptedClient::new(script.clone());
    session
        .connect_with(|| Ok(Box::new(client) as Box<dyn KernelClient>))
        .unwrap();
    (session, script)
}

pub fn execute_reply(execution_count: usize) -> Reply {
    Reply::Execute {
        execution_count,
        pages: Vec::new(),
        user_expressions: HashMap::new(),
    }
}

pub fn pid_reply(pid: &str) -> Reply {
    Reply::Execute {
        execution_count: 0,
        pages: Vec::new(),
        user_expressions: HashMap::from([("_pid".to_string(), pid.to_string())]),
    }
}
