//! `lakestore` command-line client.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Filesystem commands and bulk transfers for a lakestore account")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags that override the configuration file.
#[derive(Debug, Default, Args)]
pub struct GlobalArgs {
    /// Configuration file (default: ~/.config/lakestore/config.toml).
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Account name.
    #[arg(long, global = true)]
    pub store: Option<String>,

    /// Bearer token (also read from LAKESTORE_TOKEN).
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Concurrent chunk transfers.
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// Chunk size in bytes.
    #[arg(long, global = true)]
    pub chunk_size: Option<u64>,

    /// Block size in bytes.
    #[arg(long, global = true)]
    pub block_size: Option<u64>,

    /// Limit on a transfer run in seconds (0 = no limit).
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Directory holding unfinished transfer sessions.
    #[arg(long, value_name = "DIR", global = true)]
    pub state_dir: Option<PathBuf>,
}

impl GlobalArgs {
    pub fn apply(&self, config: &mut config::Config) {
        if let Some(store) = &self.store {
            config.store_name = store.clone();
        }
        if let Some(token) = &self.token {
            config.token = token.clone();
        }
        if let Some(threads) = self.threads {
            config.nthreads = Some(threads);
        }
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        if let Some(size) = self.block_size {
            config.block_size = size;
        }
        if let Some(secs) = self.timeout {
            config.timeout_secs = secs;
        }
        if let Some(dir) = &self.state_dir {
            config.state_dir = Some(dir.clone());
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List a directory.
    Ls {
        #[arg(default_value = "/")]
        path: String,
        /// Show type and size.
        #[arg(short, long)]
        long: bool,
        /// Bypass the listing cache.
        #[arg(long)]
        refresh: bool,
    },
    /// Print the metadata of a path as JSON.
    Info { path: String },
    /// Print a whole file.
    Cat { path: String },
    /// Print the first bytes of a file.
    Head {
        path: String,
        #[arg(short = 'c', long, default_value_t = 1024)]
        bytes: usize,
    },
    /// Print the last bytes of a file.
    Tail {
        path: String,
        #[arg(short = 'c', long, default_value_t = 1024)]
        bytes: usize,
    },
    /// Create a directory and its parents.
    Mkdir { path: String },
    /// Delete a file or directory.
    Rm {
        path: String,
        #[arg(short, long)]
        recursive: bool,
    },
    /// Rename a file or directory.
    Mv { src: String, dst: String },
    /// Change the permission bits, e.g. `750`.
    Chmod { permission: String, path: String },
    /// Change owner and/or group.
    Chown {
        path: String,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        group: Option<String>,
    },
    /// Print the ACL of a path as JSON.
    GetAcl { path: String },
    /// Replace the ACL of a path, e.g. `user::rwx,group::r-x,other::---`.
    SetAcl { path: String, spec: String },
    /// Upload a local file, directory or glob.
    Upload(TransferArgs),
    /// Download a remote file, directory or glob.
    Download(TransferArgs),
    /// Continue a saved session.
    Resume { hash: String },
    /// List saved sessions.
    Transfers {
        /// Forget every saved session.
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Debug, Args)]
pub struct TransferArgs {
    pub source: String,
    pub destination: String,
    /// Replace existing destination files.
    #[arg(long)]
    pub overwrite: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting lakestore");

    let mut config = config::Config::load(cli.global.config.as_deref())?
        .with_env_token(std::env::var(config::TOKEN_ENV).ok());
    cli.global.apply(&mut config);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, cli.command))
}
