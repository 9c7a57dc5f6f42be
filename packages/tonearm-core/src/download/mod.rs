//! Cache-backed downloader.
//!
//! Materializes a track: resolve it if needed, then either reuse the cached
//! file, hand out a live reader, or stream the source into a unique partial
//! file while a [`TailingReader`] lets playback start immediately. Finished
//! downloads are atomically renamed to `<cache_dir>/<id>.audio`.

pub mod fetch;
pub mod live;
pub mod tail;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::DownloadConfig;
use crate::error::{DownloadError, ErrorCode, TranscodeError};
use crate::protocol_constants::CACHE_FILE_EXTENSION;
use crate::resolver::{ResolvedSource, Resolver};
use crate::session::Track;
use crate::transcode::MediaInput;

pub use fetch::{ByteStream, HttpFetcher, MediaFetcher};
pub use live::LiveStreamReader;
pub use tail::{DownloadProgress, TailingReader};

/// Where a ready track's audio comes from.
pub enum TrackMedia {
    /// Complete file in the cache.
    Cached { path: PathBuf },
    /// Download in flight (or finished after the track became ready).
    Downloading {
        partial: PathBuf,
        final_path: PathBuf,
        progress: Arc<DownloadProgress>,
        /// Reader opened alongside the partial file; handed out once.
        first_reader: Mutex<Option<TailingReader>>,
    },
    /// Live stream, exclusive to the track and readable once.
    Live {
        stream: Mutex<Option<LiveStreamReader>>,
    },
}

impl TrackMedia {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }

    /// Final cache location, if this media is cached or being cached.
    pub fn cache_path(&self) -> Option<&Path> {
        match self {
            Self::Cached { path } => Some(path),
            Self::Downloading { final_path, .. } => Some(final_path),
            Self::Live { .. } => None,
        }
    }

    /// Opens a fresh input for the transcoder.
    ///
    /// Live streams can be opened once. Files still downloading are read
    /// through a tailing reader; finished ones straight from the cache.
    pub fn open(&self) -> Result<MediaInput, TranscodeError> {
        match self {
            Self::Cached { path } => Ok(MediaInput::Path(path.clone())),
            Self::Live { stream } => stream
                .lock()
                .take()
                .map(|reader| MediaInput::Reader {
                    source: Box::new(reader),
                    extension: None,
                })
                .ok_or(TranscodeError::InvalidState {
                    expected: "unread live stream",
                    actual: "stream already consumed",
                }),
            Self::Downloading {
                partial,
                final_path,
                progress,
                first_reader,
            } => {
                if let Some(reader) = first_reader.lock().take() {
                    return Ok(MediaInput::Reader {
                        source: Box::new(reader),
                        extension: None,
                    });
                }
                if progress.is_finished() {
                    return Ok(MediaInput::Path(final_path.clone()));
                }
                match TailingReader::open(partial, progress.clone()) {
                    Ok(reader) => Ok(MediaInput::Reader {
                        source: Box::new(reader),
                        extension: None,
                    }),
                    // Renamed between the check and the open.
                    Err(e) if e.kind() == io::ErrorKind::NotFound && progress.is_finished() => {
                        Ok(MediaInput::Path(final_path.clone()))
                    }
                    Err(e) => Err(TranscodeError::Io(e)),
                }
            }
        }
    }
}

impl std::fmt::Debug for TrackMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cached { path } => f.debug_struct("Cached").field("path", path).finish(),
            Self::Downloading {
                final_path,
                progress,
                ..
            } => f
                .debug_struct("Downloading")
                .field("final_path", final_path)
                .field("written", &progress.written())
                .finish(),
            Self::Live { .. } => f.write_str("Live"),
        }
    }
}

/// Terminal success payload of a track.
#[derive(Debug)]
pub struct ReadyMedia {
    pub source: ResolvedSource,
    pub media: TrackMedia,
}

/// Maps a canonical id to a file-name-safe cache key.
pub fn cache_key(canonical_id: &str) -> String {
    let safe = !canonical_id.is_empty()
        && canonical_id.len() <= 128
        && canonical_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        canonical_id.to_string()
    } else {
        hex::encode(Sha256::digest(canonical_id.as_bytes()))
    }
}

/// Streams resolved sources into the shared cache directory.
pub struct Downloader {
    resolver: Arc<Resolver>,
    fetcher: Arc<dyn MediaFetcher>,
    config: DownloadConfig,
    admission: Arc<Semaphore>,
    /// Ready tracks holding each cache file; removed when the count drops to 0.
    leases: Arc<DashMap<String, usize>>,
}

impl Downloader {
    pub fn new(
        resolver: Arc<Resolver>,
        fetcher: Arc<dyn MediaFetcher>,
        config: DownloadConfig,
    ) -> Self {
        let permits = config.max_concurrent_downloads.max(1);
        Self {
            resolver,
            fetcher,
            config,
            admission: Arc::new(Semaphore::new(permits)),
            leases: Arc::new(DashMap::new()),
        }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Final cache path for a canonical id.
    pub fn cache_path(&self, canonical_id: &str) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("{}.{}", cache_key(canonical_id), CACHE_FILE_EXTENSION))
    }

    /// Removes everything under the cache directory and recreates it.
    pub async fn purge_cache_dir(&self) -> io::Result<()> {
        let dir = &self.config.cache_dir;
        let mut removed = 0usize;
        match tokio::fs::read_dir(dir).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    let result = if entry.file_type().await?.is_dir() {
                        tokio::fs::remove_dir_all(&path).await
                    } else {
                        tokio::fs::remove_file(&path).await
                    };
                    match result {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tokio::fs::create_dir_all(dir).await?;
        log::info!(
            "[Downloader] Purged cache directory {} ({} entries)",
            dir.display(),
            removed
        );
        Ok(())
    }

    /// Runs the track's pipeline once; later calls are no-ops.
    ///
    /// Always settles the track: ready on success, error otherwise.
    pub async fn materialize(&self, track: Arc<Track>) {
        if !track.begin_pipeline() {
            return;
        }
        let token = track.cancel_token().clone();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(DownloadError::Cancelled),
            result = self.prepare(&track, &token) => result,
        };

        match result {
            Ok(ready) if token.is_cancelled() => {
                self.drop_lease(&ready);
                track.mark_error(DownloadError::Cancelled);
            }
            Ok(ready) => {
                log::info!(
                    "[Downloader] Track ready: {:?} ({:?})",
                    ready.source.title,
                    ready.media
                );
                track.mark_ready(ready);
            }
            Err(DownloadError::Cancelled) => {
                log::debug!("[Downloader] Cancelled: {}", track.reference());
                track.mark_error(DownloadError::Cancelled);
            }
            Err(e) => {
                log::warn!(
                    "[Downloader] Failed {} [{}]: {}",
                    track.reference(),
                    e.code(),
                    e
                );
                track.mark_error(e);
            }
        }
    }

    async fn prepare(
        &self,
        track: &Track,
        token: &CancellationToken,
    ) -> Result<ReadyMedia, DownloadError> {
        let source = match track.resolved() {
            Some(source) => source,
            None => {
                let source = self.resolver.resolve(track.reference()).await?;
                track.set_resolved(source.clone());
                source
            }
        };

        if source.is_live {
            let stream = self.fetcher.fetch(&source.url).await?;
            log::info!("[Downloader] Streaming live source {}", source.url);
            let reader = LiveStreamReader::spawn(stream, token.clone());
            return Ok(ReadyMedia {
                source,
                media: TrackMedia::Live {
                    stream: Mutex::new(Some(reader)),
                },
            });
        }

        let final_path = self.cache_path(&source.canonical_id);
        if tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
            log::info!("[Downloader] Cache hit: {}", final_path.display());
            self.take_lease(&source.canonical_id);
            return Ok(ReadyMedia {
                source,
                media: TrackMedia::Cached { path: final_path },
            });
        }

        let permit = self
            .admission
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DownloadError::Cancelled)?;

        let stream = self.fetcher.fetch(&source.url).await?;

        tokio::fs::create_dir_all(&self.config.cache_dir).await?;
        let partial = self.config.cache_dir.join(format!(
            "{}.{}.partial",
            cache_key(&source.canonical_id),
            uuid::Uuid::new_v4().simple()
        ));
        let file = tokio::fs::File::create(&partial).await?;
        let progress = DownloadProgress::new();
        let reader = TailingReader::open(&partial, progress.clone())?;

        tokio::spawn(write_download(
            stream,
            file,
            partial.clone(),
            Finalize {
                final_path: final_path.clone(),
                canonical_id: source.canonical_id.clone(),
                leases: Arc::clone(&self.leases),
            },
            progress.clone(),
            token.clone(),
            permit,
        ));

        self.take_lease(&source.canonical_id);
        Ok(ReadyMedia {
            source,
            media: TrackMedia::Downloading {
                partial,
                final_path,
                progress,
                first_reader: Mutex::new(Some(reader)),
            },
        })
    }

    fn take_lease(&self, canonical_id: &str) {
        *self.leases.entry(canonical_id.to_string()).or_insert(0) += 1;
    }

    /// Drops one lease; true if it was the last one.
    fn release_lease(&self, canonical_id: &str) -> bool {
        let last = match self.leases.get_mut(canonical_id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => return false,
        };
        if last {
            self.leases.remove_if(canonical_id, |_, count| *count == 0);
        }
        last
    }

    fn drop_lease(&self, ready: &ReadyMedia) {
        if ready.media.cache_path().is_some() {
            self.release_lease(&ready.source.canonical_id);
        }
    }

    /// Number of ready tracks currently holding a cache file.
    pub fn lease_count(&self, canonical_id: &str) -> usize {
        self.leases.get(canonical_id).map_or(0, |c| *c)
    }

    /// Releases a track: cancels its download and deletes its cache file
    /// unless another ready track still uses it. Idempotent.
    pub fn release(&self, track: &Track) {
        if !track.mark_released() {
            return;
        }
        track.cancel();

        let Some(outcome) = track.outcome() else {
            return;
        };
        let Ok(ready) = outcome.as_ref() else {
            return;
        };
        let Some(path) = ready.media.cache_path() else {
            return;
        };
        if self.release_lease(&ready.source.canonical_id) {
            match std::fs::remove_file(path) {
                Ok(()) => log::debug!("[Downloader] Removed unused cache file {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("[Downloader] Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

/// Where a finished download goes, and the lease table to check once it
/// is there.
struct Finalize {
    final_path: PathBuf,
    canonical_id: String,
    leases: Arc<DashMap<String, usize>>,
}

impl Finalize {
    /// A release that ran while the rename was in flight found no file to
    /// delete. Once no lease is left the freshly renamed file is removed here.
    fn sweep_if_released(&self, token: &CancellationToken) {
        let final_path = &self.final_path;
        if !token.is_cancelled() || self.leases.contains_key(&self.canonical_id) {
            return;
        }
        match std::fs::remove_file(final_path) {
            Ok(()) => log::debug!(
                "[Downloader] Removed {} released during finalize",
                final_path.display()
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "[Downloader] Failed to remove {}: {}",
                final_path.display(),
                e
            ),
        }
    }
}

/// Pumps the byte stream into the partial file, then finalizes it.
async fn write_download(
    stream: ByteStream,
    file: tokio::fs::File,
    partial: PathBuf,
    finalize: Finalize,
    progress: Arc<DownloadProgress>,
    token: CancellationToken,
    _permit: OwnedSemaphorePermit,
) {
    let result = match copy_stream(stream, file, &progress, &token).await {
        Ok(bytes) if token.is_cancelled() => {
            log::debug!("[Downloader] Discarding {} bytes of cancelled download", bytes);
            Err(DownloadError::Cancelled)
        }
        Ok(bytes) => tokio::fs::rename(&partial, &finalize.final_path)
            .await
            .map(|()| bytes)
            .map_err(DownloadError::from),
        Err(e) => Err(e),
    };

    match result {
        Ok(bytes) => {
            log::info!(
                "[Downloader] Cached {} ({} bytes)",
                finalize.final_path.display(),
                bytes
            );
            progress.finish();
            finalize.sweep_if_released(&token);
        }
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&partial).await {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    log::warn!(
                        "[Downloader] Failed to remove partial {}: {}",
                        partial.display(),
                        remove_err
                    );
                }
            }
            if matches!(e, DownloadError::Cancelled) {
                progress.cancel();
            } else {
                log::warn!("[Downloader] Download failed: {}", e);
                progress.fail(e.to_string());
            }
        }
    }
}

async fn copy_stream(
    mut stream: ByteStream,
    mut file: tokio::fs::File,
    progress: &DownloadProgress,
    token: &CancellationToken,
) -> Result<u64, DownloadError> {
    let mut total = 0u64;
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            next = stream.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                file.write_all(&chunk).await?;
                // Readers only see bytes the OS has.
                file.flush().await?;
                total += chunk.len() as u64;
                progress.advance(chunk.len());
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }
    file.sync_all().await?;
    Ok(total)
}
