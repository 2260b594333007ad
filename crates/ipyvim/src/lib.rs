//! ipyvim - send code from a text editor to a Jupyter kernel.
//!
//! A [`KernelSession`] owns one kernel connection (a freshly started kernel or
//! an existing one found through its connection file) and offers synchronous
//! execute, help, completion and interrupt operations with bounded waits.
//! A [`MessageRenderer`] drains the kernel's broadcast channel and appends
//! prompt-numbered output to a [`DisplaySurface`] supplied by the editor.
//! [`EditorContext`] ties both to the editor's commands.

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod prompt;
pub mod render;
pub mod session;
pub mod signal;

pub use client::{JupyterClient, KernelClient};
pub use commands::EditorContext;
pub use config::Config;
pub use connection::ConnectMode;
pub use error::{Result, SessionError};
pub use message::{Notification, Reply, StreamName};
pub use render::{DisplaySurface, DocSyntax, EchoStyle, MessageRenderer, ScratchBuffer};
pub use session::{KernelSession, SessionState};
pub use signal::{ControlSignal, SignalSender};
