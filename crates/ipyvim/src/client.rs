//! Synchronous kernel client over the Jupyter wire protocol.
//!
//! [`KernelClient`] is the narrow surface the session needs. [`JupyterClient`]
//! implements it with `runtimelib`: it owns a tokio runtime, one task reading
//! iopub and one task reading shell replies. Both tasks decode messages and
//! forward them into queues that the synchronous methods poll with a timeout,
//! so the caller's thread never blocks longer than it asked to.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use jupyter_protocol::{
    CompleteRequest, ConnectionInfo, ExecuteRequest, InterruptRequest, JupyterMessage,
    KernelInfoRequest, ShutdownRequest,
};
use log::{debug, error, info, warn};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::connection::{find_connection_file, read_connection_info, ConnectMode};
use crate::error::{Result, SessionError};
use crate::message::{Notification, Reply};

/// The kernel operations a session relies on.
pub trait KernelClient {
    /// Send an execute request on the shell channel, returning its msg_id.
    fn execute(&mut self, request: ExecuteRequest) -> Result<String>;

    /// Send a complete request on the shell channel, returning its msg_id.
    fn complete(&mut self, code: &str, cursor_pos: usize) -> Result<String>;

    /// Wait up to `timeout` for the next broadcast message.
    fn broadcast_message(&mut self, timeout: Duration) -> Option<Notification>;

    /// Everything already buffered on the broadcast channel, without waiting.
    fn pending_broadcasts(&mut self) -> Vec<Notification>;

    /// Wait up to `timeout` for the reply to `request_id`. Replies to other
    /// requests that arrive meanwhile are discarded.
    fn reply_message(&mut self, request_id: &str, timeout: Duration) -> Option<Reply>;

    /// Protocol-level interrupt on the control channel.
    fn interrupt(&mut self) -> Result<()>;

    /// Ask the kernel to shut down and release the channels.
    fn shutdown(&mut self) -> Result<()>;

    fn connection_file(&self) -> Option<&Path> {
        None
    }
}

fn connection_error(err: impl std::fmt::Display) -> SessionError {
    SessionError::Connection(err.to_string())
}

fn transport_error(err: impl std::fmt::Display) -> SessionError {
    SessionError::Transport(err.to_string())
}

/// A shell reply tagged with the msg_id of the request it answers.
type TaggedReply = (Option<String>, Reply);

pub struct JupyterClient {
    connection_info: ConnectionInfo,
    connection_file: PathBuf,
    session_id: String,
    shell_writer: runtimelib::DealerSendConnection,
    iopub_rx: mpsc::UnboundedReceiver<Notification>,
    shell_rx: mpsc::UnboundedReceiver<TaggedReply>,
    iopub_task: Option<tokio::task::JoinHandle<()>>,
    shell_reader_task: Option<tokio::task::JoinHandle<()>>,
    /// Present only when this client started the kernel
    process: Option<tokio::process::Child>,
    closed: bool,
    /// Declared last so channels and tasks are dropped while it is alive
    runtime: Runtime,
}

struct Channels {
    shell_writer: runtimelib::DealerSendConnection,
    iopub_rx: mpsc::UnboundedReceiver<Notification>,
    shell_rx: mpsc::UnboundedReceiver<TaggedReply>,
    iopub_task: tokio::task::JoinHandle<()>,
    shell_reader_task: tokio::task::JoinHandle<()>,
}

impl JupyterClient {
    /// Open a client according to `mode`.
    pub fn open(mode: &ConnectMode, config: &Config) -> Result<Self> {
        match mode {
            ConnectMode::NewKernel => {
                Self::start_new(&config.kernel_name, config.startup_timeout())
            }
            ConnectMode::ExistingKernel(target) => {
                let path = find_connection_file(target.as_deref())?;
                Self::attach(&path, config.startup_timeout())
            }
        }
    }

    /// Start a kernel from the named kernelspec and connect to it.
    pub fn start_new(kernel_name: &str, startup_timeout: Duration) -> Result<Self> {
        let runtime = Runtime::new().map_err(connection_error)?;
        let session_id = Uuid::new_v4().to_string();

        let (connection_info, connection_file, process) =
            runtime.block_on(launch_kernel(kernel_name))?;

        let channels = match runtime.block_on(open_channels(
            &connection_info,
            &session_id,
            startup_timeout,
        )) {
            Ok(channels) => channels,
            Err(e) => {
                let _ = std::fs::remove_file(&connection_file);
                return Err(e);
            }
        };

        Ok(Self::assemble(
            runtime,
            connection_info,
            connection_file,
            session_id,
            channels,
            Some(process),
        ))
    }

    /// Attach to the kernel described by an existing connection file.
    pub fn attach(connection_file: &Path, startup_timeout: Duration) -> Result<Self> {
        let connection_info = read_connection_info(connection_file)?;
        let runtime = Runtime::new().map_err(connection_error)?;
        let session_id = Uuid::new_v4().to_string();

        // ZeroMQ connects lazily, so probe the heartbeat before trusting the file
        if !runtime.block_on(check_kernel_alive(&connection_info, Duration::from_secs(2))) {
            return Err(SessionError::Connection(format!(
                "kernel at {} is not responding (heartbeat failed)",
                connection_file.display()
            )));
        }

        let channels =
            runtime.block_on(open_channels(&connection_info, &session_id, startup_timeout))?;
        info!("[client] Attached to kernel {:?}", connection_file);

        Ok(Self::assemble(
            runtime,
            connection_info,
            connection_file.to_path_buf(),
            session_id,
            channels,
            None,
        ))
    }

    fn assemble(
        runtime: Runtime,
        connection_info: ConnectionInfo,
        connection_file: PathBuf,
        session_id: String,
        channels: Channels,
        process: Option<tokio::process::Child>,
    ) -> Self {
        Self {
            connection_info,
            connection_file,
            session_id,
            shell_writer: channels.shell_writer,
            iopub_rx: channels.iopub_rx,
            shell_rx: channels.shell_rx,
            iopub_task: Some(channels.iopub_task),
            shell_reader_task: Some(channels.shell_reader_task),
            process,
            closed: false,
            runtime,
        }
    }

    fn send_shell(&mut self, message: JupyterMessage) -> Result<String> {
        if self.closed {
            return Err(SessionError::NotConnected);
        }
        let msg_id = message.header.msg_id.clone();
        let msg_type = message.header.msg_type.clone();
        let writer = &mut self.shell_writer;
        self.runtime
            .block_on(writer.send(message))
            .map_err(transport_error)?;
        debug!("[client] Sent {}: msg_id={}", msg_type, msg_id);
        Ok(msg_id)
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.iopub_task.take() {
            task.abort();
        }
        if let Some(task) = self.shell_reader_task.take() {
            task.abort();
        }
    }
}

impl KernelClient for JupyterClient {
    fn execute(&mut self, request: ExecuteRequest) -> Result<String> {
        self.send_shell(request.into())
    }

    fn complete(&mut self, code: &str, cursor_pos: usize) -> Result<String> {
        let request: JupyterMessage = CompleteRequest {
            code: code.to_string(),
            cursor_pos,
        }
        .into();
        self.send_shell(request)
    }

    fn broadcast_message(&mut self, timeout: Duration) -> Option<Notification> {
        let rx = &mut self.iopub_rx;
        self.runtime
            .block_on(async { tokio::time::timeout(timeout, rx.recv()).await })
            .ok()
            .flatten()
    }

    fn pending_broadcasts(&mut self) -> Vec<Notification> {
        let mut pending = Vec::new();
        while let Ok(notification) = self.iopub_rx.try_recv() {
            pending.push(notification);
        }
        pending
    }

    fn reply_message(&mut self, request_id: &str, timeout: Duration) -> Option<Reply> {
        let rx = &mut self.shell_rx;
        let wait = async {
            while let Some((parent_id, reply)) = rx.recv().await {
                if parent_id.as_deref() == Some(request_id) {
                    return Some(reply);
                }
                debug!(
                    "[client] Skipping shell reply for {:?} while waiting for {}",
                    parent_id, request_id
                );
            }
            None
        };
        self.runtime
            .block_on(async { tokio::time::timeout(timeout, wait).await })
            .ok()
            .flatten()
    }

    fn interrupt(&mut self) -> Result<()> {
        let connection_info = &self.connection_info;
        let session_id = &self.session_id;
        self.runtime.block_on(async {
            let mut control =
                runtimelib::create_client_control_connection(connection_info, session_id)
                    .await
                    .map_err(transport_error)?;
            let request: JupyterMessage = InterruptRequest {}.into();
            control.send(request).await.map_err(transport_error)
        })?;
        info!("[client] Sent interrupt_request");
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.abort_tasks();

        let connection_info = &self.connection_info;
        let session_id = &self.session_id;
        let sent: Result<()> = self.runtime.block_on(async {
            let mut control =
                runtimelib::create_client_control_connection(connection_info, session_id)
                    .await
                    .map_err(transport_error)?;
            let request: JupyterMessage = ShutdownRequest { restart: false }.into();
            control.send(request).await.map_err(transport_error)
        });
        if let Err(ref e) = sent {
            warn!("[client] Failed to send shutdown_request: {}", e);
        }

        if let Some(mut process) = self.process.take() {
            self.runtime.block_on(async {
                if tokio::time::timeout(Duration::from_secs(2), process.wait())
                    .await
                    .is_err()
                {
                    warn!("[client] Kernel did not exit after shutdown_request, killing it");
                    let _ = process.kill().await;
                }
            });
            let _ = std::fs::remove_file(&self.connection_file);
        }

        info!("[client] Kernel shutdown complete");
        sent
    }

    fn connection_file(&self) -> Option<&Path> {
        Some(&self.connection_file)
    }
}

impl Drop for JupyterClient {
    fn drop(&mut self) {
        self.abort_tasks();
        if self.process.is_some() {
            let _ = std::fs::remove_file(&self.connection_file);
        }
    }
}

async fn launch_kernel(
    kernel_name: &str,
) -> Result<(ConnectionInfo, PathBuf, tokio::process::Child)> {
    let kernelspec = runtimelib::find_kernelspec(kernel_name)
        .await
        .map_err(connection_error)?;

    // Reserve ports
    let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
    let ports = runtimelib::peek_ports(ip, 5)
        .await
        .map_err(connection_error)?;

    let connection_info = ConnectionInfo {
        transport: jupyter_protocol::connection_info::Transport::TCP,
        ip: ip.to_string(),
        stdin_port: ports[0],
        control_port: ports[1],
        hb_port: ports[2],
        shell_port: ports[3],
        iopub_port: ports[4],
        signature_scheme: "hmac-sha256".to_string(),
        key: Uuid::new_v4().to_string(),
        kernel_name: Some(kernel_name.to_string()),
    };

    let runtime_dir = runtimelib::dirs::runtime_dir();
    tokio::fs::create_dir_all(&runtime_dir)
        .await
        .map_err(connection_error)?;

    let kernel_id: String =
        petname::petname(2, "-").unwrap_or_else(|| Uuid::new_v4().to_string());
    let connection_file = runtime_dir.join(format!("ipyvim-kernel-{}.json", kernel_id));

    let contents = serde_json::to_string_pretty(&connection_info).map_err(connection_error)?;
    tokio::fs::write(&connection_file, contents)
        .await
        .map_err(connection_error)?;

    info!(
        "[client] Starting {} kernel at {:?}",
        kernel_name, connection_file
    );

    let spawned = kernelspec
        .command(&connection_file, Some(Stdio::null()), Some(Stdio::null()))
        .map_err(connection_error)
        .and_then(|mut cmd| cmd.kill_on_drop(true).spawn().map_err(connection_error));
    let process = match spawned {
        Ok(process) => process,
        Err(e) => {
            let _ = tokio::fs::remove_file(&connection_file).await;
            return Err(e);
        }
    };

    // Small delay to let the kernel bind its sockets
    tokio::time::sleep(Duration::from_millis(500)).await;

    Ok((connection_info, connection_file, process))
}

async fn open_channels(
    connection_info: &ConnectionInfo,
    session_id: &str,
    startup_timeout: Duration,
) -> Result<Channels> {
    let mut iopub = runtimelib::create_client_iopub_connection(connection_info, "", session_id)
        .await
        .map_err(connection_error)?;

    let (iopub_tx, iopub_rx) = mpsc::unbounded_channel();
    let iopub_task = tokio::spawn(async move {
        loop {
            match iopub.read().await {
                Ok(message) => {
                    debug!(
                        "[client] iopub: type={} parent_msg_id={:?}",
                        message.header.msg_type,
                        message.parent_header.as_ref().map(|h| &h.msg_id)
                    );
                    if iopub_tx.send(Notification::from_message(&message)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("[client] iopub read error: {}", e);
                    break;
                }
            }
        }
    });

    let identity = runtimelib::peer_identity_for_session(session_id).map_err(connection_error)?;
    let mut shell = runtimelib::create_client_shell_connection_with_identity(
        connection_info,
        session_id,
        identity,
    )
    .await
    .map_err(connection_error)?;

    // Verify kernel is alive
    let request: JupyterMessage = KernelInfoRequest::default().into();
    shell.send(request).await.map_err(connection_error)?;

    match tokio::time::timeout(startup_timeout, shell.read()).await {
        Ok(Ok(msg)) => {
            info!("[client] Kernel alive: got {} reply", msg.header.msg_type);
        }
        Ok(Err(e)) => {
            iopub_task.abort();
            error!("[client] Error reading kernel_info_reply: {}", e);
            return Err(connection_error(format!("kernel did not respond: {}", e)));
        }
        Err(_) => {
            iopub_task.abort();
            error!("[client] Timeout waiting for kernel_info_reply");
            return Err(SessionError::Connection(format!(
                "kernel did not respond within {:?}",
                startup_timeout
            )));
        }
    }

    let (shell_writer, mut shell_reader) = shell.split();

    let (shell_tx, shell_rx) = mpsc::unbounded_channel();
    let shell_reader_task = tokio::spawn(async move {
        loop {
            match shell_reader.read().await {
                Ok(msg) => {
                    debug!("[client] shell reply: type={}", msg.header.msg_type);
                    let parent_id = msg.parent_header.as_ref().map(|h| h.msg_id.clone());
                    if shell_tx.send((parent_id, Reply::from_message(&msg))).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("[client] shell read error: {}", e);
                    break;
                }
            }
        }
    });

    Ok(Channels {
        shell_writer,
        iopub_rx,
        shell_rx,
        iopub_task,
        shell_reader_task,
    })
}

/// Check if a kernel is alive by sending a heartbeat ping.
pub async fn check_kernel_alive(connection_info: &ConnectionInfo, timeout: Duration) -> bool {
    let heartbeat_result = tokio::time::timeout(timeout, async {
        let mut hb = runtimelib::create_client_heartbeat_connection(connection_info).await?;
        hb.single_heartbeat().await
    })
    .await;

    matches!(heartbeat_result, Ok(Ok(())))
}

/// Blocking heartbeat probe for callers without a runtime.
pub fn probe_kernel(connection_file: &Path, timeout: Duration) -> bool {
    let Ok(info) = read_connection_info(connection_file) else {
        return false;
    };
    match Runtime::new() {
        Ok(runtime) => runtime.block_on(check_kernel_alive(&info, timeout)),
        Err(e) => {
            warn!("[client] Unable to start runtime for heartbeat: {}", e);
            false
        }
    }
}
