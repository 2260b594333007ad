//! Rendering of kernel broadcast messages into the editor's log surface.
//!
//! The renderer pulls whatever is already queued on the session's broadcast
//! channel, turns each message into prompt-prefixed text and appends it to the
//! log line by line. It keeps the execution count of the last input or
//! result it saw so that display data can be numbered too.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::config::Config;
use crate::message::Notification;
use crate::prompt::{continuation_prompt, format_prompt, PromptState};
use crate::session::KernelSession;

fn color_escape() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;]*[mK]").expect("static ANSI pattern is valid")
    })
}

/// Remove ANSI colour and erase-line sequences.
pub fn strip_color_escapes(text: &str) -> String {
    color_escape().replace_all(text, "").into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoStyle {
    Question,
    Operator,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocSyntax {
    Rst,
    Python,
}

/// What the editor host provides for output.
pub trait DisplaySurface {
    /// Whether the log is shown in some window
    fn is_log_visible(&self) -> bool;

    /// Whether the caller's current view is the log itself
    fn is_log_focused(&self) -> bool;

    /// Open the log if needed and move the view to it
    fn focus_log(&mut self);

    fn last_log_line(&self) -> Option<String>;

    fn append_log(&mut self, lines: &[String]);

    fn scroll_log_to_end(&mut self);

    /// Return to the view that was active before `focus_log`
    fn restore_view(&mut self);

    /// Short status-line message
    fn echo(&mut self, text: &str, style: EchoStyle);

    fn open_document(&mut self, name: &str, lines: &[String], syntax: DocSyntax);
}

/// A document opened on a [`ScratchBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub lines: Vec<String>,
    pub syntax: DocSyntax,
}

/// In-memory surface that records everything done to it.
#[derive(Debug, Default, Clone)]
pub struct ScratchBuffer {
    pub lines: Vec<String>,
    pub visible: bool,
    pub focused: bool,
    pub in_log: bool,
    pub scrolls: usize,
    pub restores: usize,
    pub echoes: Vec<(String, EchoStyle)>,
    pub documents: Vec<Document>,
}

impl ScratchBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface whose log window is already open.
    pub fn visible() -> Self {
        Self {
            visible: true,
            ..Self::default()
        }
    }
}

impl DisplaySurface for ScratchBuffer {
    fn is_log_visible(&self) -> bool {
        self.visible
    }

    fn is_log_focused(&self) -> bool {
        self.focused
    }

    fn focus_log(&mut self) {
        self.visible = true;
        self.in_log = true;
    }

    fn last_log_line(&self) -> Option<String> {
        self.lines.last().cloned()
    }

    fn append_log(&mut self, lines: &[String]) {
        self.lines.extend_from_slice(lines);
    }

    fn scroll_log_to_end(&mut self) {
        self.scrolls += 1;
    }

    fn restore_view(&mut self) {
        self.in_log = false;
        self.restores += 1;
    }

    fn echo(&mut self, text: &str, style: EchoStyle) {
        self.echoes.push((text.to_string(), style));
    }

    fn open_document(&mut self, name: &str, lines: &[String], syntax: DocSyntax) {
        self.documents.push(Document {
            name: name.to_string(),
            lines: lines.to_vec(),
            syntax,
        });
    }
}

pub struct MessageRenderer {
    prompt_in: String,
    prompt_out: String,
    blank_lines: bool,
    state: PromptState,
}

impl MessageRenderer {
    pub fn new(config: &Config) -> Self {
        Self {
            prompt_in: config.status_prompt_in.clone(),
            prompt_out: config.status_prompt_out.clone(),
            blank_lines: config.status_blank_lines,
            state: PromptState::new(config.show_execution_count),
        }
    }

    /// Pick up changed templates and toggles, keeping the prompt counter.
    pub fn apply_config(&mut self, config: &Config) {
        self.prompt_in = config.status_prompt_in.clone();
        self.prompt_out = config.status_prompt_out.clone();
        self.blank_lines = config.status_blank_lines;
        self.state.show_execution_count = config.show_execution_count;
    }

    pub fn prompt_state(&self) -> &PromptState {
        &self.state
    }

    /// Text for one notification, or `None` for kinds that render nothing.
    pub fn render(&mut self, notification: &Notification) -> Option<String> {
        match notification {
            Notification::Status | Notification::Other { .. } => None,
            Notification::Stream { text, .. } => Some(strip_color_escapes(text)),
            Notification::ExecuteResult { count, text } => {
                self.state.execution_count = *count;
                Some(format_prompt(&self.prompt_out, *count) + text)
            }
            Notification::DisplayData { text } => {
                Some(format_prompt(&self.prompt_out, self.state.execution_count) + text)
            }
            Notification::ExecuteInput { count, code } => {
                self.state.execution_count = *count;
                let prompt = format_prompt(&self.prompt_in, *count);
                let leader = format!("\n{}", continuation_prompt(&prompt));
                Some(prompt.clone() + &code.trim_end().replace('\n', &leader))
            }
            Notification::Error {
                traceback,
                name,
                value,
            } => {
                let mut lines: Vec<String> =
                    traceback.iter().map(|l| strip_color_escapes(l)).collect();
                lines.push(format!("{}: {}", name, value));
                Some(lines.join("\n"))
            }
        }
    }

    /// Render everything already queued on the session into `surface`.
    ///
    /// Does nothing without a connection, or when the log is hidden and
    /// `force` is not set. Returns whether any message produced output.
    pub fn drain_and_render(
        &mut self,
        session: &mut KernelSession,
        surface: &mut dyn DisplaySurface,
        force: bool,
    ) -> bool {
        if !session.is_connected() || (!surface.is_log_visible() && !force) {
            return false;
        }
        let notifications = session.pending_notifications();
        self.render_into(&notifications, surface, force)
    }

    /// Append `notifications` to the log in order.
    pub fn render_into(
        &mut self,
        notifications: &[Notification],
        surface: &mut dyn DisplaySurface,
        force: bool,
    ) -> bool {
        let started_in_log = surface.is_log_focused();
        if !started_in_log {
            surface.focus_log();
        }

        let mut updated = false;
        for notification in notifications {
            let Some(block) = self.render(notification) else {
                continue;
            };
            let lines = if block.contains(['\n', '\r']) {
                split_log_lines(&block)
            } else {
                vec![block]
            };
            surface.append_log(&lines);
            updated = true;
        }

        // Leave an empty line to start typing on
        if self.blank_lines && surface.last_log_line().is_some_and(|l| !l.is_empty()) {
            surface.append_log(&[String::new()]);
        }
        if updated || force {
            surface.scroll_log_to_end();
        }
        if !started_in_log {
            surface.restore_view();
        }
        updated
    }
}

/// Split on `\n`, `\r\n` and lone `\r`, dropping a trailing empty piece.
fn split_log_lines(block: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut rest = block;
    while let Some(at) = rest.find(['\n', '\r']) {
        lines.push(rest[..at].to_string());
        let width = if rest[at..].starts_with("\r\n") { 2 } else { 1 };
        rest = &rest[at + width..];
    }
    if !rest.is_empty() {
        lines.push(rest.to_string());
    }
    lines
}
