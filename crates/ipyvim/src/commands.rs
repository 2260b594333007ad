//! Editor-facing commands built on a session and a renderer.
//!
//! Every `run_*` command sends code, reports the input prompt on the status
//! line and, with `monitor_subchannel` set, flushes pending kernel output into
//! the log afterwards. Failures are echoed as short status messages and also
//! returned to the caller.

use log::debug;

use crate::config::Config;
use crate::connection::ConnectMode;
use crate::error::{Result, SessionError};
use crate::prompt::highlight_commands;
use crate::render::{DisplaySurface, DocSyntax, EchoStyle, MessageRenderer};
use crate::session::KernelSession;
use crate::signal::ControlSignal;

pub struct EditorContext {
    pub config: Config,
    pub session: KernelSession,
    pub renderer: MessageRenderer,
}

impl EditorContext {
    pub fn new(config: Config) -> Self {
        let session = KernelSession::new(&config);
        Self::with_session(config, session)
    }

    pub fn with_session(config: Config, session: KernelSession) -> Self {
        let renderer = MessageRenderer::new(&config);
        Self {
            config,
            session,
            renderer,
        }
    }

    /// Merge option overrides into the running configuration.
    pub fn configure(&mut self, overrides: &serde_json::Value) -> std::result::Result<(), serde_json::Error> {
        self.config.merge(overrides)?;
        self.session.apply_config(&self.config);
        self.renderer.apply_config(&self.config);
        Ok(())
    }

    pub fn highlights(&self) -> Vec<String> {
        highlight_commands(&self.config)
    }

    pub fn connect(&mut self, mode: &ConnectMode, surface: &mut dyn DisplaySurface) -> Result<()> {
        match self.session.connect(mode) {
            Ok(()) => {
                surface.echo("Kernel Connected", EchoStyle::Question);
                Ok(())
            }
            Err(e) => {
                surface.echo(&e.to_string(), EchoStyle::Error);
                Err(e)
            }
        }
    }

    /// Detach from the kernel, leaving it running.
    pub fn disconnect(&mut self, surface: &mut dyn DisplaySurface) {
        self.session.disconnect();
        surface.echo("Kernel disconnected", EchoStyle::Question);
    }

    pub fn shutdown(&mut self, surface: &mut dyn DisplaySurface) -> Result<()> {
        let result = self.session.shutdown();
        match &result {
            Ok(()) => surface.echo("Kernel shut down", EchoStyle::Question),
            Err(e) => surface.echo(&e.to_string(), EchoStyle::Error),
        }
        result
    }

    /// Flush pending kernel output into the log.
    pub fn update(&mut self, surface: &mut dyn DisplaySurface, force: bool) -> bool {
        self.renderer
            .drain_and_render(&mut self.session, surface, force)
    }

    fn with_update<T>(
        &mut self,
        surface: &mut dyn DisplaySurface,
        command: impl FnOnce(&mut Self, &mut dyn DisplaySurface) -> Result<T>,
    ) -> Result<T> {
        let result = command(self, &mut *surface);
        if let Err(e) = &result {
            surface.echo(&e.to_string(), EchoStyle::Error);
        }
        if self.config.monitor_subchannel {
            self.update(surface, true);
        }
        result
    }

    fn send_and_prompt(&mut self, code: &str, prompt: &str, surface: &mut dyn DisplaySurface) -> Result<()> {
        let msg_id = self.session.send(code)?;
        self.print_prompt(prompt, Some(&msg_id), surface)
    }

    /// Echo `In[n]: prompt`, waiting for the reply to `msg_id` for the count.
    pub fn print_prompt(
        &mut self,
        prompt: &str,
        msg_id: Option<&str>,
        surface: &mut dyn DisplaySurface,
    ) -> Result<()> {
        let state = self.renderer.prompt_state().clone();
        match msg_id {
            Some(id) if state.show_execution_count => {
                match self.session.resolve_execution_count(id)? {
                    Some(count) => surface.echo(&state.echo_for(prompt, Some(count)), EchoStyle::Question),
                    None => surface.echo(
                        &format!("In[]: {} (no reply from IPython kernel)", prompt),
                        EchoStyle::Question,
                    ),
                }
            }
            _ => surface.echo(&state.echo_for(prompt, None), EchoStyle::Question),
        }
        Ok(())
    }

    /// Send one line. A line ending in `?` or `??` opens help for the word
    /// before the question marks instead.
    pub fn run_line(&mut self, line: &str, dedent: bool, surface: &mut dyn DisplaySurface) -> Result<()> {
        self.with_update(surface, |ctx, surface| {
            let line = if dedent { line.trim_start() } else { line };
            let trimmed = line.trim_end();
            if trimmed.ends_with('?') {
                let level = if trimmed.ends_with("??") { 1 } else { 0 };
                let word = help_word(trimmed);
                debug!("[commands] Help request for {:?} at level {}", word, level);
                return ctx.show_documentation(&word, level, surface);
            }
            ctx.send_and_prompt(line, line, surface)
        })
    }

    /// Send a block of lines starting at 1-based `first_line`.
    pub fn run_lines(
        &mut self,
        lines: &[String],
        first_line: usize,
        dedent: bool,
        surface: &mut dyn DisplaySurface,
    ) -> Result<()> {
        self.with_update(surface, |ctx, surface| {
            let code = if dedent {
                match dedent_lines(lines) {
                    Some(code) => code,
                    None => return Ok(()),
                }
            } else {
                lines.join("\n")
            };
            let last_line = first_line + lines.len().saturating_sub(1);
            let prompt = format!("lines {}-{} ", first_line, last_line);
            ctx.send_and_prompt(&code, &prompt, surface)
        })
    }

    pub fn run_command(&mut self, code: &str, surface: &mut dyn DisplaySurface) -> Result<()> {
        self.with_update(surface, |ctx, surface| ctx.send_and_prompt(code, code, surface))
    }

    pub fn run_word(&mut self, word: &str, surface: &mut dyn DisplaySurface) -> Result<()> {
        self.run_command(word, surface)
    }

    pub fn run_selection(&mut self, text: &str, surface: &mut dyn DisplaySurface) -> Result<()> {
        self.run_command(text, surface)
    }

    /// Run a whole file with the `%run` magic and the configured flags.
    pub fn run_file(&mut self, path: &str, surface: &mut dyn DisplaySurface) -> Result<()> {
        let code = format!("%run {} {}", self.config.run_flags, quote_path(path));
        self.run_command(&code, surface)
    }

    /// Open the kernel's help for `word` as a document.
    pub fn show_documentation(
        &mut self,
        word: &str,
        level: usize,
        surface: &mut dyn DisplaySurface,
    ) -> Result<()> {
        let doc = self.session.fetch_documentation(word, level)?;
        if doc.is_empty() {
            surface.echo(&format!("'{}' not found", word), EchoStyle::Error);
            return Ok(());
        }
        let syntax = if level == 0 {
            DocSyntax::Rst
        } else {
            DocSyntax::Python
        };
        surface.open_document(word, &doc, syntax);
        Ok(())
    }

    /// Protocol-level interrupt.
    pub fn interrupt_kernel(&mut self, surface: &mut dyn DisplaySurface) -> Result<()> {
        self.with_update(surface, |ctx, surface| {
            ctx.session.interrupt()?;
            surface.echo("KeyboardInterrupt (sent to kernel)", EchoStyle::Operator);
            Ok(())
        })
    }

    /// Signal the kernel process directly. Returns the pid signalled, or
    /// `None` when the signal could not be delivered.
    pub fn interrupt_kernel_hack(
        &mut self,
        signal: ControlSignal,
        surface: &mut dyn DisplaySurface,
    ) -> Result<Option<u32>> {
        match self.session.send_control_signal(signal) {
            Ok(pid) => {
                surface.echo(
                    &format!(
                        "KeyboardInterrupt (sent to ipython: pid {} with signal {})",
                        pid, signal
                    ),
                    EchoStyle::Operator,
                );
                Ok(Some(pid))
            }
            Err(SessionError::UnknownPid) => {
                surface.echo(
                    "cannot get kernel PID, Ctrl-C will not be supported",
                    EchoStyle::Warning,
                );
                Ok(None)
            }
            Err(SessionError::ProcessSignal { pid, .. }) => {
                surface.echo(&format!("unable to kill pid {}", pid), EchoStyle::Error);
                Ok(None)
            }
            Err(e) => {
                surface.echo(&e.to_string(), EchoStyle::Error);
                Err(e)
            }
        }
    }

    pub fn terminate_kernel_hack(&mut self, surface: &mut dyn DisplaySurface) -> Result<Option<u32>> {
        self.interrupt_kernel_hack(ControlSignal::Terminate, surface)
    }
}

/// Remove the indentation of the first non-blank line from every line.
///
/// `None` when all lines are blank.
pub fn dedent_lines(lines: &[String]) -> Option<String> {
    let first = lines.iter().find(|line| !line.trim().is_empty())?;
    let leading = first.chars().count() - first.trim_start().chars().count();
    Some(
        lines
            .iter()
            .map(|line| line.chars().skip(leading).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// The identifier (dotted names allowed) right before the first `?`.
fn help_word(line: &str) -> String {
    let head = line.split('?').next().unwrap_or("");
    let word: Vec<char> = head
        .chars()
        .rev()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
        .collect();
    word.into_iter().rev().collect()
}

fn quote_path(path: &str) -> String {
    format!("'{}'", path.replace('\\', "\\\\").replace('\'', "\\'"))
}
