//! Entry point tying the watch service, offset store and config together

use crate::aggregate::AggregateTailStream;
use crate::folder::FolderTail;
use crate::stream::{FileTailStream, StreamOptions};
use logtrail_core::{OffsetStore, Result, TailConfig};
use logtrail_watcher::{PathPredicate, WatchService};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Opens tail streams over files and directories.
///
/// All streams opened through one tailer share its watch groups (one native
/// watch per directory) and its offset store.
pub struct Tailer {
    service: WatchService,
    store: Arc<dyn OffsetStore>,
    config: TailConfig,
}

impl Tailer {
    /// Validate `config` and open the configured offset store
    pub fn new(config: TailConfig) -> Result<Self> {
        config.validate()?;
        let store = logtrail_journal::open_store(&config.offsets)?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: TailConfig, store: Arc<dyn OffsetStore>) -> Self {
        info!(
            identity = ?config.identity.strategy,
            backend = ?config.watch.backend,
            persistent = config.offsets.path.is_some(),
            "Tailer ready"
        );
        Self {
            service: WatchService::new(&config),
            store,
            config,
        }
    }

    pub fn config(&self) -> &TailConfig {
        &self.config
    }

    pub fn service(&self) -> &WatchService {
        &self.service
    }

    pub fn store(&self) -> &Arc<dyn OffsetStore> {
        &self.store
    }

    fn stream_options(&self) -> StreamOptions {
        StreamOptions::new(&self.config.reader, self.config.tail.open)
    }

    /// Follow one file until it is deleted or renamed away
    pub fn tail_file(&self, path: &Path) -> Result<FileTailStream> {
        FileTailStream::monitored(
            &self.service,
            path,
            Arc::clone(&self.store),
            self.config.reader.start,
            self.stream_options(),
        )
    }

    /// Follow every eligible file of a directory, including files that
    /// appear later
    pub fn tail_folder(&self, dir: &Path) -> Result<FolderTail> {
        FolderTail::start(&self.service, dir, Arc::clone(&self.store), &self.config, None)
    }

    /// Like [`Tailer::tail_folder`], additionally requiring `predicate` to
    /// accept a file
    pub fn tail_folder_filtered<F>(&self, dir: &Path, predicate: F) -> Result<FolderTail>
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        let predicate: PathPredicate = Arc::new(predicate);
        FolderTail::start(
            &self.service,
            dir,
            Arc::clone(&self.store),
            &self.config,
            Some(predicate),
        )
    }

    /// Follow an explicit set of files as one stream. It ends once every
    /// file has been deleted or renamed away.
    pub fn tail_paths<P: AsRef<Path>>(&self, paths: &[P]) -> Result<AggregateTailStream> {
        let streams = paths
            .iter()
            .map(|path| self.tail_file(path.as_ref()).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(AggregateTailStream::explicit(streams))
    }

    /// Read a file once to its end, without watching it
    pub fn open_static(&self, path: &Path) -> Result<FileTailStream> {
        FileTailStream::open_static(path, self.config.reader.buffer_size)
    }

    /// Release every directory watch. Open streams stop receiving changes.
    pub fn close(&self) {
        self.service.close();
    }
}

impl std::fmt::Debug for Tailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tailer")
            .field("groups", &self.service.group_count())
            .field("config", &self.config)
            .finish()
    }
}
