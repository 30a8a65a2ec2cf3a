//! Follow files and directories, printing lines until interrupted

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use logtrail_core::{Error, Line, TailConfig};
use logtrail_tail::{FileTailStream, FolderTail, Tailer};
use owo_colors::OwoColorize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Lines buffered between readers and the printer
const CHANNEL_CAPACITY: usize = 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One command-line path being followed
enum Target {
    File(FileTailStream),
    Folder(FolderTail),
}

impl Target {
    fn open(tailer: &Tailer, path: &Path) -> Result<Self> {
        if path.is_dir() {
            let folder = tailer
                .tail_folder(path)
                .with_context(|| format!("Failed to tail directory {}", path.display()))?;
            Ok(Target::Folder(folder))
        } else {
            let stream = tailer
                .tail_file(path)
                .with_context(|| format!("Failed to tail file {}", path.display()))?;
            Ok(Target::File(stream))
        }
    }

    fn poll(&self, timeout: Duration) -> logtrail_core::Result<Option<Line>> {
        match self {
            Target::File(stream) => stream.poll(timeout),
            Target::Folder(folder) => folder.poll(timeout),
        }
    }

    fn close(&self) {
        match self {
            Target::File(stream) => stream.close(),
            Target::Folder(folder) => folder.close(),
        }
    }

    fn path(&self) -> &Path {
        match self {
            Target::File(stream) => stream.path(),
            Target::Folder(folder) => folder.dir(),
        }
    }
}

pub async fn run(paths: Vec<PathBuf>, config: TailConfig) -> Result<()> {
    let tailer = Tailer::new(config).context("Failed to start tailer")?;
    let targets = paths
        .iter()
        .map(|path| Target::open(&tailer, path).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;

    let (tx, rx) = bounded::<Line>(CHANNEL_CAPACITY);
    let mut readers = Vec::with_capacity(targets.len());
    for target in &targets {
        let target = Arc::clone(target);
        let tx = tx.clone();
        let reader = thread::Builder::new()
            .name(format!("lt-read-{}", readers.len()))
            .spawn(move || pump(&target, &tx))
            .context("Failed to spawn reader thread")?;
        readers.push(reader);
    }
    drop(tx);

    let mut printer = tokio::task::spawn_blocking(move || print_lines(rx));
    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted, stopping");
            None
        }
        printed = &mut printer => Some(printed.context("Printer task failed")??),
    };

    for target in &targets {
        target.close();
    }
    tailer.close();
    tokio::task::spawn_blocking(move || {
        for reader in readers {
            let _ = reader.join();
        }
    })
    .await
    .context("Failed to join reader threads")?;

    let printed = match finished {
        Some(count) => count,
        None => printer.await.context("Printer task failed")??,
    };
    info!(lines = printed, "Done");
    Ok(())
}

/// Forward lines of one target to the printer until it ends or is closed
fn pump(target: &Target, tx: &Sender<Line>) {
    loop {
        match target.poll(POLL_INTERVAL) {
            Ok(Some(line)) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            // An empty directory picks up files created later
            Err(Error::EndOfStream) if matches!(target, Target::Folder(_)) => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(Error::EndOfStream) => {
                info!(path = %target.path().display(), "Stream ended");
                break;
            }
            Err(Error::Closed) => break,
            Err(e) => {
                warn!(path = %target.path().display(), error = %e, "Stream failed");
                break;
            }
        }
    }
}

/// Print `path:line: text` until every reader is gone
fn print_lines(rx: Receiver<Line>) -> Result<u64> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut count = 0;
    for line in rx.iter() {
        let written = writeln!(
            out,
            "{}:{}: {}",
            line.source.path.display().cyan(),
            line.line_number.dimmed(),
            line.text()
        );
        match written {
            Ok(()) => count += 1,
            // Reader of our stdout went away (e.g. `lt tail ... | head`)
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => break,
            Err(e) => return Err(e).context("Failed to write to stdout"),
        }
        if rx.is_empty() {
            out.flush().context("Failed to flush stdout")?;
        }
    }
    Ok(count)
}
