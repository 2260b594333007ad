//! JSON line channel between an editor job and the kernel session.
//!
//! The editor writes `[id, {"method": ..., ...}]` frames, one per line, and
//! gets `[id, response]` back. The response carries the method result and the
//! display effects (log lines, status messages, an opened document, view
//! moves) that the editor script applies to its own buffers.

use std::io::{BufRead, Write};

use anyhow::{anyhow, Result};
use ipyvim::render::{DisplaySurface, DocSyntax, EchoStyle};
use ipyvim::{ConnectMode, ControlSignal, EditorContext};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Editor view state sent along with a request.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ViewState {
    pub log_visible: bool,
    pub log_focused: bool,
    pub last_line: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    Connect {
        #[serde(default)]
        new: bool,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        kernel: Option<String>,
    },
    Execute {
        code: String,
    },
    RunLine {
        line: String,
        #[serde(default)]
        dedent: bool,
    },
    RunLines {
        lines: Vec<String>,
        #[serde(default = "first_line")]
        first_line: usize,
        #[serde(default)]
        dedent: bool,
    },
    RunCommand {
        code: String,
    },
    RunFile {
        path: String,
    },
    Update {
        #[serde(default)]
        force: bool,
    },
    Doc {
        word: String,
        #[serde(default)]
        level: usize,
    },
    Complete {
        base: String,
        line: String,
        cursor: usize,
    },
    Interrupt {
        /// Signal the process instead of sending a protocol interrupt
        #[serde(default)]
        signal: bool,
    },
    Terminate,
    Highlights,
    Configure {
        options: Value,
    },
    Disconnect,
    Shutdown,
}

fn first_line() -> usize {
    1
}

#[derive(Debug, Serialize)]
pub struct Echo {
    pub text: String,
    pub style: EchoStyle,
}

#[derive(Debug, Serialize)]
pub struct OpenedDocument {
    pub name: String,
    pub lines: Vec<String>,
    pub syntax: DocSyntax,
}

/// Display effects collected while handling one request.
#[derive(Debug, Default, Serialize)]
pub struct Effects {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub append: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub echo: Vec<Echo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<OpenedDocument>,
    pub focus_log: bool,
    pub scroll_to_end: bool,
    pub restore_view: bool,
}

/// A [`DisplaySurface`] that records effects for the editor to replay.
#[derive(Debug, Default)]
pub struct ChannelSurface {
    view: ViewState,
    pub effects: Effects,
}

impl ChannelSurface {
    pub fn new(view: ViewState) -> Self {
        Self {
            view,
            effects: Effects::default(),
        }
    }
}

impl DisplaySurface for ChannelSurface {
    fn is_log_visible(&self) -> bool {
        self.view.log_visible
    }

    fn is_log_focused(&self) -> bool {
        self.view.log_focused
    }

    fn focus_log(&mut self) {
        self.view.log_visible = true;
        self.effects.focus_log = true;
    }

    fn last_log_line(&self) -> Option<String> {
        self.view.last_line.clone()
    }

    fn append_log(&mut self, lines: &[String]) {
        if let Some(last) = lines.last() {
            self.view.last_line = Some(last.clone());
        }
        self.effects.append.extend_from_slice(lines);
    }

    fn scroll_log_to_end(&mut self) {
        self.effects.scroll_to_end = true;
    }

    fn restore_view(&mut self) {
        self.effects.restore_view = true;
    }

    fn echo(&mut self, text: &str, style: EchoStyle) {
        self.effects.echo.push(Echo {
            text: text.to_string(),
            style,
        });
    }

    fn open_document(&mut self, name: &str, lines: &[String], syntax: DocSyntax) {
        self.effects.document = Some(OpenedDocument {
            name: name.to_string(),
            lines: lines.to_vec(),
            syntax,
        });
    }
}

pub struct Bridge {
    ctx: EditorContext,
}

impl Bridge {
    pub fn new(ctx: EditorContext) -> Self {
        Self { ctx }
    }

    pub fn context_mut(&mut self) -> &mut EditorContext {
        &mut self.ctx
    }

    /// Serve frames from `input` until it closes.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> Result<()> {
        info!("[bridge] Waiting for requests");
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_frame(&line) {
                writeln!(output, "{}", response)?;
                output.flush()?;
            }
        }
        info!("[bridge] Input closed");
        Ok(())
    }

    /// Answer one `[id, request]` frame. Malformed frames get no answer.
    pub fn handle_frame(&mut self, line: &str) -> Option<String> {
        let (id, body) = match serde_json::from_str::<(Value, Value)>(line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[bridge] Skipping malformed frame: {}", e);
                return None;
            }
        };

        let view = body
            .get("view")
            .cloned()
            .map(serde_json::from_value::<ViewState>)
            .transpose()
            .unwrap_or_else(|e| {
                warn!("[bridge] Ignoring invalid view state: {}", e);
                None
            })
            .unwrap_or_default();
        let mut surface = ChannelSurface::new(view);

        let outcome = serde_json::from_value::<Request>(body)
            .map_err(|e| anyhow!("invalid request: {}", e))
            .and_then(|request| {
                debug!("[bridge] Request {}: {:?}", id, request);
                self.dispatch(request, &mut surface)
            });

        let response = match outcome {
            Ok(result) => json!({ "ok": true, "result": result, "effects": surface.effects }),
            Err(e) => json!({ "ok": false, "error": e.to_string(), "effects": surface.effects }),
        };
        Some(json!([id, response]).to_string())
    }

    fn dispatch(&mut self, request: Request, surface: &mut ChannelSurface) -> Result<Value> {
        let ctx = &mut self.ctx;
        let result = match request {
            Request::Connect {
                new,
                target,
                kernel,
            } => {
                if let Some(kernel) = kernel {
                    ctx.configure(&json!({ "kernel_name": kernel }))?;
                }
                let mode = if new {
                    ConnectMode::NewKernel
                } else {
                    ConnectMode::ExistingKernel(target)
                };
                ctx.connect(&mode, surface)?;
                json!({
                    "connection_file": ctx.session.connection_file(),
                    "state": ctx.session.state(),
                })
            }
            Request::Execute { code } => json!(ctx.session.execute_and_collect(&code)?),
            Request::RunLine { line, dedent } => {
                ctx.run_line(&line, dedent, surface)?;
                Value::Null
            }
            Request::RunLines {
                lines,
                first_line,
                dedent,
            } => {
                ctx.run_lines(&lines, first_line, dedent, surface)?;
                Value::Null
            }
            Request::RunCommand { code } => {
                ctx.run_command(&code, surface)?;
                Value::Null
            }
            Request::RunFile { path } => {
                ctx.run_file(&path, surface)?;
                Value::Null
            }
            Request::Update { force } => json!(ctx.update(surface, force)),
            Request::Doc { word, level } => {
                ctx.show_documentation(&word, level, surface)?;
                Value::Null
            }
            Request::Complete { base, line, cursor } => {
                json!(ctx.session.complete(&base, &line, cursor)?)
            }
            Request::Interrupt { signal: false } => {
                ctx.interrupt_kernel(surface)?;
                Value::Null
            }
            Request::Interrupt { signal: true } => {
                json!(ctx.interrupt_kernel_hack(ControlSignal::Interrupt, surface)?)
            }
            Request::Terminate => json!(ctx.terminate_kernel_hack(surface)?),
            Request::Highlights => json!(ctx.highlights()),
            Request::Configure { options } => {
                ctx.configure(&options)?;
                serde_json::to_value(&ctx.config)?
            }
            Request::Disconnect => {
                ctx.disconnect(surface);
                Value::Null
            }
            Request::Shutdown => {
                ctx.shutdown(surface)?;
                Value::Null
            }
        };
        Ok(result)
    }
}
