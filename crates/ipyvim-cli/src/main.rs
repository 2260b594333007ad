//! ipyvim CLI entry point.
//!
//! `ipyvim bridge` is the long-running sidecar an editor job talks to over
//! stdin/stdout. The other subcommands are one-shot helpers.

use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ipyvim::client::probe_kernel;
use ipyvim::connection::{list_connection_files, read_connection_info, runtime_dir};
use ipyvim::{Config, ConnectMode, EditorContext, KernelSession};
use log::{error, info};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

mod bridge;
mod replay;

use crate::bridge::Bridge;

#[derive(Parser, Debug)]
#[command(name = "ipyvim")]
#[command(about = "Drive a Jupyter kernel from a text editor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (logs go to stderr)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Settings file (default: <config dir>/ipyvim/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve editor requests over a JSON line channel on stdin/stdout
    Bridge {
        /// Start a new kernel right away
        #[arg(long, conflicts_with = "existing")]
        new: bool,

        /// Attach to a running kernel: a connection file path, a fragment of
        /// its name, or nothing for the most recent one
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        existing: Option<String>,

        /// Kernelspec for new kernels
        #[arg(long)]
        kernel: Option<String>,
    },

    /// Execute code once and print the result
    Exec {
        /// Attach to a running kernel instead of starting one
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        existing: Option<String>,

        /// Kernelspec for a new kernel
        #[arg(long)]
        kernel: Option<String>,

        /// Code to run (read from stdin when omitted)
        code: Option<String>,
    },

    /// List connection files in the Jupyter runtime directory
    Kernels {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Render a JSONL message dump as the editor log would show it
    Replay {
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .target(env_logger::Target::Stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    match cli.command {
        Commands::Bridge {
            new,
            existing,
            kernel,
        } => {
            if let Some(kernel) = kernel {
                config.kernel_name = kernel;
            }
            run_bridge(config, connect_mode(new, existing))
        }
        Commands::Exec {
            existing,
            kernel,
            code,
        } => {
            if let Some(kernel) = kernel {
                config.kernel_name = kernel;
            }
            let mode = connect_mode(existing.is_none(), existing)
                .unwrap_or(ConnectMode::NewKernel);
            exec_once(&config, &mode, code)
        }
        Commands::Kernels { json } => list_kernels(json),
        Commands::Replay { file } => {
            let input = std::fs::File::open(&file)
                .with_context(|| format!("Failed to open {}", file.display()))?;
            for line in replay::render_dump(BufReader::new(input), &config)? {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

fn connect_mode(new: bool, existing: Option<String>) -> Option<ConnectMode> {
    match existing {
        Some(target) if target.is_empty() => Some(ConnectMode::ExistingKernel(None)),
        Some(target) => Some(ConnectMode::ExistingKernel(Some(target))),
        None if new => Some(ConnectMode::NewKernel),
        None => None,
    }
}

fn run_bridge(config: Config, mode: Option<ConnectMode>) -> Result<()> {
    let mut ctx = EditorContext::new(config);
    if let Some(mode) = mode {
        // Startup failures are not fatal; the editor can send `connect` later
        if let Err(e) = ctx.session.connect(&mode) {
            error!("[bridge] Initial connection failed: {}", e);
        }
    }

    let mut bridge = Bridge::new(ctx);
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let result = bridge.run(stdin.lock(), stdout.lock());

    let ctx = bridge.context_mut();
    if ctx.session.is_connected() {
        info!("[bridge] Shutting down kernel");
        ctx.session.shutdown()?;
    }
    result
}

fn exec_once(config: &Config, mode: &ConnectMode, code: Option<String>) -> Result<()> {
    let code = match code {
        Some(code) => code,
        None => {
            let mut code = String::new();
            std::io::stdin().read_to_string(&mut code)?;
            code
        }
    };

    let mut session = KernelSession::new(config);
    session.connect(mode)?;
    let result = session.execute_and_collect(&code);

    // Leave kernels we did not start running
    if matches!(mode, ConnectMode::ExistingKernel(_)) {
        session.disconnect();
    } else {
        session.shutdown()?;
    }

    let text = result?;
    if !text.is_empty() {
        println!("{}", text);
    }
    Ok(())
}

#[derive(Serialize, Clone, Copy, Debug)]
#[serde(rename_all = "lowercase")]
enum KernelStatus {
    Alive,
    Unresponsive,
}

impl std::fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelStatus::Alive => write!(f, "alive"),
            KernelStatus::Unresponsive => write!(f, "unresponsive"),
        }
    }
}

#[derive(Serialize)]
struct KernelEntry {
    name: String,
    kernel_name: Option<String>,
    status: KernelStatus,
    connection_file: PathBuf,
}

#[derive(Tabled)]
struct KernelTableRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "KERNEL")]
    kernel_name: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "CONNECTION FILE")]
    connection_file: String,
}

impl From<&KernelEntry> for KernelTableRow {
    fn from(entry: &KernelEntry) -> Self {
        KernelTableRow {
            name: entry.name.clone(),
            kernel_name: entry
                .kernel_name
                .clone()
                .unwrap_or_else(|| "-".to_string()),
            status: entry.status.to_string(),
            connection_file: shorten_path(&entry.connection_file),
        }
    }
}

/// Shorten a path for display by replacing home directory with ~
fn shorten_path(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(relative) = path.strip_prefix(&home) {
            return format!("~/{}", relative.display());
        }
    }
    path.display().to_string()
}

fn gather_kernel_entry(path: PathBuf, timeout: Duration) -> KernelEntry {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string();
    let kernel_name = read_connection_info(&path)
        .ok()
        .and_then(|info| info.kernel_name);
    let status = if probe_kernel(&path, timeout) {
        KernelStatus::Alive
    } else {
        KernelStatus::Unresponsive
    };
    KernelEntry {
        name,
        kernel_name,
        status,
        connection_file: path,
    }
}

fn list_kernels(json_output: bool) -> Result<()> {
    let timeout = Duration::from_secs(2);
    let entries: Vec<KernelEntry> = list_connection_files(&runtime_dir())
        .into_iter()
        .map(|path| gather_kernel_entry(path, timeout))
        .collect();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No kernels found in {}", shorten_path(&runtime_dir()));
        return Ok(());
    }

    let rows: Vec<KernelTableRow> = entries.iter().map(KernelTableRow::from).collect();
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
    Ok(())
}
