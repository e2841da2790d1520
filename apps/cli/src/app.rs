//! Command execution.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use lakestore_protocol::DirectoryEntry;
use lakestore_rest::HttpTransport;
use lakestore_store::{FileSystem, LakePath};
use lakestore_transfer::{
    Direction, Downloader, ProgressFn, SessionSnapshot, SpeedCalculator, TransferClient,
    TransferError, TransferOptions, TransferStore, Uploader,
};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::Config;
use crate::{Command, TransferArgs};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Connects to the configured account and runs `command`.
pub async fn run(config: Config, command: Command) -> anyhow::Result<()> {
    if let Command::Transfers { clear } = command {
        return transfers(&config, clear, &mut std::io::stdout());
    }

    if config.store_name.is_empty() {
        bail!("no account configured: set store_name in the config file or pass --store");
    }
    let transport = HttpTransport::new(config.http_config())
        .with_context(|| format!("failed to set up a client for {}", config.store_name))?;
    let fs = Arc::new(FileSystem::new(Arc::new(transport)));
    execute(fs, &config, command, &mut std::io::stdout()).await
}

/// Runs `command` against `fs`, printing results to `out`.
pub async fn execute(
    fs: Arc<FileSystem>,
    config: &Config,
    command: Command,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match command {
        Command::Ls {
            path,
            long,
            refresh,
        } => {
            let entries = fs.ls(&LakePath::new(&path), refresh).await?;
            for entry in &entries {
                print_entry(&mut *out, entry, long)?;
            }
        }
        Command::Info { path } => {
            let entry = fs.info(&LakePath::new(&path), true).await?;
            serde_json::to_writer_pretty(&mut *out, &entry)?;
            writeln!(out)?;
        }
        Command::Cat { path } => out.write_all(&fs.cat(&LakePath::new(&path)).await?)?,
        Command::Head { path, bytes } => {
            out.write_all(&fs.head(&LakePath::new(&path), bytes).await?)?
        }
        Command::Tail { path, bytes } => {
            out.write_all(&fs.tail(&LakePath::new(&path), bytes).await?)?
        }
        Command::Mkdir { path } => fs.mkdir(&LakePath::new(&path)).await?,
        Command::Rm { path, recursive } => fs.rm(&LakePath::new(&path), recursive).await?,
        Command::Mv { src, dst } => fs.mv(&LakePath::new(&src), &LakePath::new(&dst)).await?,
        Command::Chmod { permission, path } => {
            fs.chmod(&LakePath::new(&path), &permission).await?
        }
        Command::Chown { path, owner, group } => {
            fs.chown(&LakePath::new(&path), owner.as_deref(), group.as_deref())
                .await?
        }
        Command::GetAcl { path } => {
            let acl = fs.get_acl_status(&LakePath::new(&path)).await?;
            serde_json::to_writer_pretty(&mut *out, &acl)?;
            writeln!(out)?;
        }
        Command::SetAcl { path, spec } => fs.set_acl(&LakePath::new(&path), &spec).await?,
        Command::Upload(args) => upload(fs, config, args).await?,
        Command::Download(args) => download(fs, config, args).await?,
        Command::Resume { hash } => resume(fs, config, &hash).await?,
        Command::Transfers { clear } => transfers(config, clear, &mut *out)?,
    }
    out.flush()?;
    Ok(())
}

fn print_entry(out: &mut impl Write, entry: &DirectoryEntry, long: bool) -> std::io::Result<()> {
    if long {
        let kind = if entry.is_dir() { "dir" } else { "file" };
        writeln!(out, "{kind:<4} {:>14} /{}", entry.length(), entry.name)
    } else {
        writeln!(out, "/{}", entry.name)
    }
}

async fn upload(fs: Arc<FileSystem>, config: &Config, args: TransferArgs) -> anyhow::Result<()> {
    let (options, speed) = transfer_options(config, args.overwrite);
    let uploader = Uploader::new(fs, &args.source, &LakePath::new(&args.destination), options)
        .await
        .with_context(|| format!("cannot upload {}", args.source))?;
    drive(uploader.client(), uploader.run(None, true), &speed).await
}

async fn download(fs: Arc<FileSystem>, config: &Config, args: TransferArgs) -> anyhow::Result<()> {
    let (options, speed) = transfer_options(config, args.overwrite);
    let downloader = Downloader::new(
        fs,
        &LakePath::new(&args.source),
        Path::new(&args.destination),
        options,
    )
    .await
    .with_context(|| format!("cannot download {}", args.source))?;
    drive(downloader.client(), downloader.run(None, true), &speed).await
}

async fn resume(fs: Arc<FileSystem>, config: &Config, hash: &str) -> anyhow::Result<()> {
    let dir = state_dir(config)?;
    let snapshot = find_session(&dir, hash)?
        .with_context(|| format!("no saved session {hash} in {}", dir.display()))?;
    let (options, speed) = transfer_options(config, snapshot.overwrite);
    info!(
        hash,
        direction = snapshot.direction.as_str(),
        source = %snapshot.source,
        destination = %snapshot.destination,
        "resuming transfer"
    );
    match snapshot.direction {
        Direction::Upload => {
            let uploader = Uploader::resume(fs, snapshot, options).await?;
            drive(uploader.client(), uploader.run(None, true), &speed).await
        }
        Direction::Download => {
            let downloader = Downloader::resume(fs, snapshot, options).await?;
            drive(downloader.client(), downloader.run(None, true), &speed).await
        }
    }
}

fn find_session(dir: &Path, hash: &str) -> anyhow::Result<Option<SessionSnapshot>> {
    for direction in [Direction::Upload, Direction::Download] {
        if let Some(snapshot) = TransferStore::for_direction(dir, direction).get(hash)? {
            return Ok(Some(snapshot));
        }
    }
    Ok(None)
}

fn transfers(config: &Config, clear: bool, out: &mut impl Write) -> anyhow::Result<()> {
    let dir = state_dir(config)?;
    if clear {
        Uploader::clear_saved(&dir)?;
        Downloader::clear_saved(&dir)?;
        info!(dir = %dir.display(), "cleared saved sessions");
        return Ok(());
    }
    let mut sessions: Vec<SessionSnapshot> = Uploader::load(&dir)?
        .into_values()
        .chain(Downloader::load(&dir)?.into_values())
        .collect();
    sessions.sort_by(|a, b| a.hash.cmp(&b.hash));
    for s in &sessions {
        writeln!(
            out,
            "{}  {:<8}  {} -> {}  {}/{} bytes, {} files",
            s.hash,
            s.direction.as_str(),
            s.source,
            s.destination,
            s.finished_bytes(),
            s.total_bytes(),
            s.files.len()
        )?;
    }
    Ok(())
}

fn state_dir(config: &Config) -> anyhow::Result<PathBuf> {
    config
        .state_dir()
        .context("no state directory: set state_dir in the config file or pass --state-dir")
}

/// Options for a session driven by [`drive`]; the run itself is started by
/// the caller so that it can be interrupted.
fn transfer_options(config: &Config, overwrite: bool) -> (TransferOptions, Arc<SpeedCalculator>) {
    let speed = Arc::new(SpeedCalculator::default());
    let last = Arc::new(AtomicU64::new(0));
    let sampler = Arc::clone(&speed);
    let progress: ProgressFn = Arc::new(move |done, _total| {
        let previous = last.swap(done, Ordering::Relaxed);
        sampler.add_sample(done.saturating_sub(previous));
    });
    let options = TransferOptions {
        client: config.client_config(overwrite),
        run: false,
        persist_dir: config.state_dir(),
        progress: Some(progress),
    };
    (options, speed)
}

/// Awaits `run`, reporting progress until it ends.
///
/// Ctrl-C or a timeout cancels the session and saves it so that `resume`
/// can pick it up.
async fn drive(
    client: &TransferClient,
    run: impl Future<Output = Result<(), TransferError>>,
    speed: &SpeedCalculator,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(run, ctrl_c);

    let interrupted = loop {
        tokio::select! {
            result = &mut run => match result {
                Ok(()) => break false,
                Err(TransferError::Timeout) => {
                    warn!(hash = client.hash(), "transfer timed out");
                    break true;
                }
                Err(e) => return Err(e.into()),
            },
            _ = &mut ctrl_c => {
                info!(hash = client.hash(), "interrupted, stopping transfer");
                break true;
            }
            _ = ticker.tick() => report(client, speed),
        }
    };

    if interrupted {
        client.cancel();
        client.wait().await;
        client.save(true)?;
    }
    eprintln!();

    if client.successful() {
        info!(
            hash = client.hash(),
            bytes = client.total_bytes(),
            "transfer complete"
        );
        return Ok(());
    }
    let status = client
        .status()
        .iter()
        .map(|(state, count)| format!("{state:?}={count}").to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    bail!(
        "transfer incomplete ({status}); continue with `lakestore resume {}`",
        client.hash()
    )
}

fn report(client: &TransferClient, speed: &SpeedCalculator) {
    let done = client.bytes_done();
    let total = client.total_bytes();
    let rate = speed.bytes_per_second();
    let eta = speed
        .eta(total.saturating_sub(done))
        .map(|d| format!("{}s", d.as_secs()))
        .unwrap_or_else(|| "-".into());
    eprint!("\r{done}/{total} bytes  {:.1} MiB/s  eta {eta}   ", rate / (1024.0 * 1024.0));
}
