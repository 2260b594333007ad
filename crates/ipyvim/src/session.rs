//! One kernel connection with synchronous request/response semantics.
//!
//! [`KernelSession`] owns the [`KernelClient`] for its whole lifetime. All
//! waiting is bounded by the configured poll and reply timeouts; a missing
//! reply is an ordinary outcome and turns into an empty result.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use jupyter_protocol::ExecuteRequest;
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::client::{JupyterClient, KernelClient};
use crate::config::Config;
use crate::connection::ConnectMode;
use crate::error::{Result, SessionError};
use crate::message::{Notification, Reply, StreamName};
use crate::render::strip_color_escapes;
use crate::signal::{ControlSignal, ProcessSignals, SignalSender};

const PID_EXPRESSION: &str = "__import__('os').getpid()";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::ShuttingDown => write!(f, "shutting down"),
        }
    }
}

pub struct KernelSession {
    state: SessionState,
    client: Option<Box<dyn KernelClient>>,
    /// Kernel process id, discovered on first use
    pid: Option<u32>,
    signals: Box<dyn SignalSender>,
    config: Config,
}

impl KernelSession {
    pub fn new(config: &Config) -> Self {
        Self::with_signals(config, Box::new(ProcessSignals))
    }

    pub fn with_signals(config: &Config, signals: Box<dyn SignalSender>) -> Self {
        Self {
            state: SessionState::Disconnected,
            client: None,
            pid: None,
            signals,
            config: config.clone(),
        }
    }

    /// Use new timeouts and kernel settings for subsequent operations.
    pub fn apply_config(&mut self, config: &Config) {
        self.config = config.clone();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// The cached kernel process id, if it has been discovered.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn connection_file(&self) -> Option<&Path> {
        self.client.as_deref().and_then(|c| c.connection_file())
    }

    /// Start or attach to a kernel, replacing any current connection.
    pub fn connect(&mut self, mode: &ConnectMode) -> Result<()> {
        let config = self.config.clone();
        self.connect_with(|| {
            JupyterClient::open(mode, &config).map(|c| Box::new(c) as Box<dyn KernelClient>)
        })
    }

    /// Connect using `open` to obtain the client.
    pub fn connect_with<F>(&mut self, open: F) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn KernelClient>>,
    {
        if self.client.is_some() {
            if let Err(e) = self.shutdown() {
                warn!("[session] Error shutting down previous kernel: {}", e);
            }
        }

        self.state = SessionState::Connecting;
        match open() {
            Ok(client) => {
                if let Some(path) = client.connection_file() {
                    info!("[session] Connected to kernel {:?}", path);
                } else {
                    info!("[session] Connected to kernel");
                }
                self.client = Some(client);
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                error!("[session] Connection failed: {}", e);
                if e.is_connection_failure() {
                    Err(e)
                } else {
                    Err(SessionError::Connection(e.to_string()))
                }
            }
        }
    }

    fn client_mut(&mut self) -> Result<&mut Box<dyn KernelClient>> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        self.client.as_mut().ok_or(SessionError::NotConnected)
    }

    /// Submit `code` without waiting for anything, returning the request id.
    pub fn send(&mut self, code: &str) -> Result<String> {
        self.client_mut()?.execute(ExecuteRequest::new(code.to_string()))
    }

    /// Execute `code` and return the text of the final meaningful message.
    ///
    /// Broadcast messages are collected until one poll interval passes with
    /// nothing new, then [`select_result`] picks the returned text.
    pub fn execute_and_collect(&mut self, code: &str) -> Result<String> {
        let poll = self.config.poll_timeout();
        let client = self.client_mut()?;

        if let Err(e) = client.execute(ExecuteRequest::new(code.to_string())) {
            error!("[session] Failed to send execute_request: {}", e);
            return Ok(String::new());
        }

        let mut messages = Vec::new();
        while let Some(notification) = client.broadcast_message(poll) {
            messages.push(notification);
        }
        debug!("[session] Collected {} messages", messages.len());

        Ok(select_result(&messages))
    }

    /// Help text for `word`, from a `word?` (`word??` at level 1) request.
    ///
    /// Empty when the kernel does not answer in time or sends no page.
    pub fn fetch_documentation(&mut self, word: &str, level: usize) -> Result<Vec<String>> {
        let timeout = self.config.reply_timeout();
        let client = self.client_mut()?;

        let code = format!("{}{}", word, "?".repeat(level + 1));
        let msg_id = match client.execute(ExecuteRequest::new(code)) {
            Ok(id) => id,
            Err(e) => {
                error!("[session] Failed to request documentation: {}", e);
                return Ok(Vec::new());
            }
        };

        match client.reply_message(&msg_id, timeout) {
            Some(Reply::Execute { pages, .. }) => Ok(pages
                .first()
                .map(|page| {
                    page.split('\n')
                        .map(|line| strip_color_escapes(line).trim_end().to_string())
                        .collect()
                })
                .unwrap_or_default()),
            Some(other) => {
                debug!("[session] Unexpected reply to documentation request: {:?}", other);
                Ok(Vec::new())
            }
            None => {
                debug!("[session] Documentation: {}", SessionError::Timeout(timeout));
                Ok(Vec::new())
            }
        }
    }

    /// Completions for `base` at `cursor_pos` (in characters) of `full_line`.
    ///
    /// The first entry is always `base` itself, followed by the kernel's
    /// matches in the order the kernel sent them. The base is inserted into
    /// the line when the editor has already removed it.
    pub fn complete(&mut self, base: &str, full_line: &str, cursor_pos: usize) -> Result<Vec<String>> {
        let timeout = self.config.complete_timeout();
        let client = self.client_mut()?;

        let (code, cursor) = completion_request(base, full_line, cursor_pos);
        let mut completions = vec![base.to_string()];
        let msg_id = match client.complete(&code, cursor) {
            Ok(id) => id,
            Err(e) => {
                error!("[session] Failed to send complete_request: {}", e);
                return Ok(completions);
            }
        };

        match client.reply_message(&msg_id, timeout) {
            Some(Reply::Complete { matches, .. }) => completions.extend(matches),
            Some(other) => debug!("[session] Unexpected reply to complete_request: {:?}", other),
            None => debug!("[session] Completion: {}", SessionError::Timeout(timeout)),
        }
        Ok(completions)
    }

    /// Execution count from the reply to `msg_id`, or `None` on timeout.
    pub fn resolve_execution_count(&mut self, msg_id: &str) -> Result<Option<usize>> {
        let timeout = self.config.reply_timeout();
        match self.client_mut()?.reply_message(msg_id, timeout) {
            Some(Reply::Execute {
                execution_count, ..
            }) => Ok(Some(execution_count)),
            _ => Ok(None),
        }
    }

    /// Ask the kernel for its OS process id through a user expression.
    pub fn discover_process_id(&mut self) -> Result<Option<u32>> {
        if let Some(pid) = self.pid {
            return Ok(Some(pid));
        }

        let timeout = self.config.reply_timeout();
        let client = self.client_mut()?;
        let mut user_expressions = HashMap::new();
        user_expressions.insert("_pid".to_string(), PID_EXPRESSION.to_string());
        let request = ExecuteRequest {
            code: String::new(),
            silent: true,
            store_history: false,
            user_expressions: Some(user_expressions),
            allow_stdin: false,
            stop_on_error: false,
        };

        let msg_id = match client.execute(request) {
            Ok(id) => id,
            Err(e) => {
                error!("[session] Failed to request kernel pid: {}", e);
                return Ok(None);
            }
        };

        let pid = match client.reply_message(&msg_id, timeout) {
            Some(Reply::Execute {
                user_expressions, ..
            }) => user_expressions
                .get("_pid")
                .and_then(|text| text.trim().parse::<u32>().ok()),
            _ => None,
        };
        match pid {
            Some(pid) => info!("[session] Kernel pid is {}", pid),
            None => warn!("[session] Could not determine kernel pid"),
        }
        self.pid = pid;
        Ok(pid)
    }

    /// Signal the kernel process directly, returning the pid signalled.
    ///
    /// A failed delivery forgets the cached pid so the next attempt
    /// rediscovers it.
    pub fn send_control_signal(&mut self, signal: ControlSignal) -> Result<u32> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let pid = match self.pid {
            Some(pid) => pid,
            None => self.discover_process_id()?.ok_or(SessionError::UnknownPid)?,
        };

        if let Err(e) = self.signals.send_control_signal(pid, signal) {
            warn!("[session] Sending {} to {} failed: {}", signal, pid, e);
            self.pid = None;
            return Err(e);
        }
        info!("[session] Sent {} to kernel pid {}", signal, pid);
        Ok(pid)
    }

    /// Protocol-level interrupt.
    pub fn interrupt(&mut self) -> Result<()> {
        self.client_mut()?.interrupt()
    }

    /// Everything already queued on the broadcast channel.
    pub fn pending_notifications(&mut self) -> Vec<Notification> {
        match self.client_mut() {
            Ok(client) => client.pending_broadcasts(),
            Err(_) => Vec::new(),
        }
    }

    /// Send a shutdown request and release the connection.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(mut client) = self.client.take() else {
            self.state = SessionState::Disconnected;
            return Ok(());
        };

        self.state = SessionState::ShuttingDown;
        let result = client.shutdown();
        drop(client);
        self.pid = None;
        self.state = SessionState::Disconnected;
        info!("[session] Session closed");
        result
    }

    /// Release the connection without asking the kernel to exit.
    pub fn disconnect(&mut self) {
        if self.client.take().is_some() {
            info!("[session] Detached from kernel");
        }
        self.pid = None;
        self.state = SessionState::Disconnected;
    }
}

impl Drop for KernelSession {
    fn drop(&mut self) {
        if self.client.is_some() {
            if let Err(e) = self.shutdown() {
                warn!("[session] Error during shutdown on drop: {}", e);
            }
        }
    }
}

/// Pick the text `execute_and_collect` returns from the collected messages.
///
/// Fewer than three messages yields nothing. Otherwise the second-to-last
/// message decides: a result or display payload, stdout text, or an error
/// traceback. This depends on how many messages the kernel emits and in what
/// order, so it is not reliable across kernels.
pub fn select_result(messages: &[Notification]) -> String {
    if messages.len() < 3 {
        return String::new();
    }
    match &messages[messages.len() - 2] {
        Notification::ExecuteResult { text, .. } | Notification::DisplayData { text } => {
            text.clone()
        }
        Notification::Stream {
            name: StreamName::Stdout,
            text,
        } => text.clone(),
        Notification::Error {
            traceback,
            name,
            value,
        } => {
            warn!("[session] Execution raised {}: {}", name, value);
            traceback.join("\n")
        }
        _ => String::new(),
    }
}

fn completion_request(base: &str, full_line: &str, cursor_pos: usize) -> (String, usize) {
    let chars: Vec<char> = full_line.chars().collect();
    let at = cursor_pos.min(chars.len());
    let rest: String = chars[at..].iter().collect();
    let base_len = base.chars().count();

    if rest.starts_with(base) {
        return (full_line.to_string(), at + base_len);
    }
    let head: String = chars[..at].iter().collect();
    (format!("{}{}{}", head, base, rest), at + base_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(count: usize, text: &str) -> Notification {
        Notification::ExecuteResult {
            count,
            text: text.into(),
        }
    }

    #[test]
    fn test_too_few_messages() {
        assert_eq!(select_result(&[]), "");
        assert_eq!(
            select_result(&[Notification::Status, result(1, "5")]),
            ""
        );
    }

    #[test]
    fn test_second_to_last_payload() {
        let messages = vec![
            Notification::Status,
            Notification::stdout("5\n"),
            result(3, "5"),
            Notification::Status,
        ];
        assert_eq!(select_result(&messages), "5");

        let messages = vec![
            Notification::Status,
            Notification::ExecuteInput {
                count: 1,
                code: "print(1)".into(),
            },
            Notification::stdout("1\n"),
            Notification::Status,
        ];
        assert_eq!(select_result(&messages), "1\n");
    }

    #[test]
    fn test_stderr_and_input_yield_nothing() {
        let messages = vec![
            Notification::Status,
            Notification::stderr("warning\n"),
            Notification::Status,
        ];
        assert_eq!(select_result(&messages), "");

        let messages = vec![
            Notification::Status,
            Notification::ExecuteInput {
                count: 1,
                code: "x = 1".into(),
            },
            Notification::Status,
        ];
        assert_eq!(select_result(&messages), "");
    }

    #[test]
    fn test_traceback_is_returned_verbatim() {
        let messages = vec![
            Notification::Status,
            Notification::ExecuteInput {
                count: 2,
                code: "1/0".into(),
            },
            Notification::Error {
                traceback: vec!["line1".into(), "line2".into()],
                name: "ZeroDivisionError".into(),
                value: "division by zero".into(),
            },
            Notification::Status,
        ];
        assert_eq!(select_result(&messages), "line1\nline2");
    }

    #[test]
    fn test_completion_request() {
        assert_eq!(completion_request("pri", "pri", 0), ("pri".to_string(), 3));
        assert_eq!(
            completion_request("pri", "x = ", 4),
            ("x = pri".to_string(), 7)
        );
        assert_eq!(
            completion_request("é", "a(b)", 2),
            ("a(éb)".to_string(), 3)
        );
        assert_eq!(completion_request("os", "", 10), ("os".to_string(), 2));
    }

    #[test]
    fn test_operations_require_connection() {
        let mut session = KernelSession::new(&Config::default());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.execute_and_collect("1 + 1"),
            Err(SessionError::NotConnected)
        ));
        assert!(matches!(session.send("x"), Err(SessionError::NotConnected)));
        assert!(matches!(
            session.send_control_signal(ControlSignal::Interrupt),
            Err(SessionError::NotConnected)
        ));
        assert!(session.pending_notifications().is_empty());
        assert!(session.shutdown().is_ok());
    }

    #[test]
    fn test_failed_connect_stays_disconnected() {
        let mut session = KernelSession::new(&Config::default());
        let err = session
            .connect_with(|| Err(SessionError::Transport("socket closed".into())))
            .unwrap_err();
        assert!(matches!(err, SessionError::Connection(_)));
        assert_eq!(session.state(), SessionState::Disconnected);

        let err = session
            .connect_with(|| Err(SessionError::NoConnectionFile(None)))
            .unwrap_err();
        assert!(matches!(err, SessionError::NoConnectionFile(None)));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::ShuttingDown.to_string(), "shutting down");
        assert_eq!(
            serde_json::to_string(&SessionState::Connected).unwrap(),
            "\"connected\""
        );
    }
}
