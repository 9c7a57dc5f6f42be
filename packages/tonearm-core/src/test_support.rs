//! Shared test doubles for the collaborator traits.
//!
//! Hand-written mocks: each records its calls and returns whatever the test
//! configured with `set`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::ResolverConfig;
use crate::download::{ByteStream, MediaFetcher};
use crate::error::{DownloadError, ProviderError, ProviderResult, TransportError, TransportResult};
use crate::events::{BroadcastEvent, EventEmitter, SessionEvent, TrackEvent};
use crate::resolver::{
    MediaMetadata, MetadataExtractor, PageScraper, PageSummary, Providers, RelatedEntry,
    RelatedProvider, Resolver, SearchProvider, SearchResult,
};
use crate::transport::{AudioTransport, FramePoll, FrameSupplier, TransportConnector};

pub fn search_result(url: &str, title: &str, source: &str, secs: u64) -> SearchResult {
    SearchResult {
        url: url.to_string(),
        title: title.to_string(),
        source: Some(source.to_string()),
        duration: Some(Duration::from_secs(secs)),
        id: None,
    }
}

pub fn entry(url: &str, title: &str, source: &str, id: &str) -> RelatedEntry {
    RelatedEntry {
        url: url.to_string(),
        title: title.to_string(),
        source: Some(source.to_string()),
        id: Some(id.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolver collaborators
// ─────────────────────────────────────────────────────────────────────────────

pub struct MockSearch {
    name: String,
    results: Mutex<Vec<SearchResult>>,
    pub calls: AtomicUsize,
    pub last_query: Mutex<Option<String>>,
}

impl MockSearch {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            results: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            last_query: Mutex::new(None),
        }
    }

    pub fn set(&self, results: Vec<SearchResult>) {
        *self.results.lock() = results;
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str, limit: usize) -> ProviderResult<Vec<SearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_query.lock() = Some(query.to_string());
        Ok(self.results.lock().iter().take(limit).cloned().collect())
    }
}

pub struct MockMetadata {
    result: Mutex<ProviderResult<MediaMetadata>>,
    pub delay: Mutex<Duration>,
    pub calls: AtomicUsize,
}

impl Default for MockMetadata {
    fn default() -> Self {
        Self {
            result: Mutex::new(Err(ProviderError::NotFound("no metadata".into()))),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockMetadata {
    pub fn set(&self, result: ProviderResult<MediaMetadata>) {
        *self.result.lock() = result;
    }
}

#[async_trait]
impl MetadataExtractor for MockMetadata {
    async fn extract(&self, _url: &str) -> ProviderResult<MediaMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.result.lock().clone()
    }
}

pub struct MockScraper {
    result: Mutex<ProviderResult<PageSummary>>,
}

impl Default for MockScraper {
    fn default() -> Self {
        Self {
            result: Mutex::new(Err(ProviderError::NotFound("no page".into()))),
        }
    }
}

impl MockScraper {
    pub fn set(&self, result: ProviderResult<PageSummary>) {
        *self.result.lock() = result;
    }
}

#[async_trait]
impl PageScraper for MockScraper {
    async fn scrape(&self, _url: &str) -> ProviderResult<PageSummary> {
        self.result.lock().clone()
    }
}

pub struct MockRelated {
    name: String,
    entries: Mutex<Vec<RelatedEntry>>,
    pub calls: AtomicUsize,
}

impl MockRelated {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, entries: Vec<RelatedEntry>) {
        *self.entries.lock() = entries;
    }
}

#[async_trait]
impl RelatedProvider for MockRelated {
    fn name(&self) -> &str {
        &self.name
    }

    async fn related(&self, _canonical_id: &str) -> ProviderResult<Vec<RelatedEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().clone())
    }
}

/// Every resolver collaborator, individually reachable for configuration.
pub struct MockProviders {
    pub music: Arc<MockSearch>,
    pub catalog: Arc<MockSearch>,
    pub metadata: Arc<MockMetadata>,
    pub scraper: Arc<MockScraper>,
    pub primary: Arc<MockRelated>,
    pub secondary: Arc<MockRelated>,
}

impl MockProviders {
    pub fn new() -> Self {
        Self {
            music: Arc::new(MockSearch::new("music")),
            catalog: Arc::new(MockSearch::new("catalog")),
            metadata: Arc::new(MockMetadata::default()),
            scraper: Arc::new(MockScraper::default()),
            primary: Arc::new(MockRelated::new("primary")),
            secondary: Arc::new(MockRelated::new("secondary")),
        }
    }

    pub fn providers(&self) -> Providers {
        Providers {
            catalog_search: self.catalog.clone(),
            music_search: self.music.clone(),
            metadata: self.metadata.clone(),
            scraper: self.scraper.clone(),
            primary_related: self.primary.clone(),
            secondary_related: self.secondary.clone(),
        }
    }

    pub fn resolver(&self, config: ResolverConfig) -> Resolver {
        Resolver::new(self.providers(), config)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Media fetcher
// ─────────────────────────────────────────────────────────────────────────────

enum FetchBehavior {
    Body(Vec<Bytes>),
    Fail(String),
    /// Yields one chunk, then never completes.
    Stall(Bytes),
    /// Yields one chunk, then the rest once the gate is cancelled.
    Gated {
        first: Bytes,
        rest: Bytes,
        gate: CancellationToken,
    },
}

pub struct MockFetcher {
    behavior: Mutex<FetchBehavior>,
    pub calls: AtomicUsize,
}

impl MockFetcher {
    pub fn with_body(chunks: Vec<Vec<u8>>) -> Self {
        Self::new(FetchBehavior::Body(chunks.into_iter().map(Bytes::from).collect()))
    }

    pub fn failing(message: &str) -> Self {
        Self::new(FetchBehavior::Fail(message.to_string()))
    }

    pub fn stalling(first: Vec<u8>) -> Self {
        Self::new(FetchBehavior::Stall(Bytes::from(first)))
    }

    /// Holds every body after its first chunk until `gate` is cancelled.
    pub fn gated(first: Vec<u8>, rest: Vec<u8>, gate: CancellationToken) -> Self {
        Self::new(FetchBehavior::Gated {
            first: Bytes::from(first),
            rest: Bytes::from(rest),
            gate,
        })
    }

    /// Serves the same bytes for every fetch.
    pub fn with_bytes(body: Vec<u8>) -> Self {
        let chunks = body.chunks(16 * 1024).map(<[u8]>::to_vec).collect();
        Self::with_body(chunks)
    }

    fn new(behavior: FetchBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MediaFetcher for MockFetcher {
    async fn fetch(&self, _url: &str) -> Result<ByteStream, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.behavior.lock() {
            FetchBehavior::Body(chunks) => {
                let items: Vec<Result<Bytes, DownloadError>> =
                    chunks.iter().cloned().map(Ok).collect();
                Ok(futures::stream::iter(items).boxed())
            }
            FetchBehavior::Fail(message) => Err(DownloadError::Network(message.clone())),
            FetchBehavior::Stall(first) => Ok(futures::stream::iter(vec![Ok(first.clone())])
                .chain(futures::stream::pending())
                .boxed()),
            FetchBehavior::Gated { first, rest, gate } => {
                let gate = gate.clone();
                let rest = rest.clone();
                let tail = futures::stream::once(async move {
                    gate.cancelled().await;
                    Ok(rest)
                });
                Ok(futures::stream::iter(vec![Ok(first.clone())])
                    .chain(tail)
                    .boxed())
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audio fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a 16-bit PCM WAV holding a 440 Hz sine at half scale.
pub fn wav_bytes(sample_rate: u32, channels: u16, frames: u32) -> Vec<u8> {
    let block_align = channels as u32 * 2;
    let data_len = frames * block_align;
    let mut out = Vec::with_capacity(44 + data_len as usize);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align).to_le_bytes());
    out.extend_from_slice(&(block_align as u16).to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let value = ((t * 440.0 * std::f32::consts::TAU).sin() * 0.5 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

/// Writes [`wav_bytes`] to `<dir>/<name>` and returns the path.
pub fn write_wav(
    dir: &std::path::Path,
    name: &str,
    sample_rate: u32,
    channels: u16,
    frames: u32,
) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, wav_bytes(sample_rate, channels, frames)).unwrap();
    path
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Records every transport call. Once [`MockTransport::start_polling`] runs,
/// it pulls the installed supplier every millisecond like a real transport
/// pulls every 20 ms.
#[derive(Default)]
pub struct MockTransport {
    opened: Mutex<Vec<String>>,
    pub closes: AtomicUsize,
    statuses: Mutex<Vec<(String, String)>>,
    status_attempts: AtomicUsize,
    failing_statuses: AtomicUsize,
    speaking: AtomicBool,
    supplier: Mutex<Option<Arc<dyn FrameSupplier>>>,
    played: Mutex<Vec<u64>>,
    pub ends: AtomicUsize,
    held: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Polls the supplier until the transport is dropped.
    pub fn start_polling(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(1));
            loop {
                tick.tick().await;
                let Some(transport) = weak.upgrade() else {
                    return;
                };
                transport.poll_once();
            }
        });
    }

    fn poll_once(&self) {
        if self.held.load(Ordering::SeqCst) {
            return;
        }
        let Some(supplier) = self.supplier.lock().clone() else {
            return;
        };
        match supplier.poll_frame() {
            FramePoll::Frame(frame) => self.played.lock().push(frame.pts),
            FramePoll::Silence => {}
            FramePoll::End => {
                self.ends.fetch_add(1, Ordering::SeqCst);
                // A real transport goes idle until the next supplier arrives.
                let mut slot = self.supplier.lock();
                if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, &supplier)) {
                    *slot = None;
                }
            }
        }
    }

    /// Stops pulling frames until [`MockTransport::release`].
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    pub fn fail_next_status_updates(&self, count: usize) {
        self.failing_statuses.store(count, Ordering::SeqCst);
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    /// Successfully committed status lines.
    pub fn statuses(&self) -> Vec<(String, String)> {
        self.statuses.lock().clone()
    }

    pub fn last_status(&self) -> Option<String> {
        self.statuses.lock().last().map(|(_, text)| text.clone())
    }

    pub fn status_attempts(&self) -> usize {
        self.status_attempts.load(Ordering::SeqCst)
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn has_supplier(&self) -> bool {
        self.supplier.lock().is_some()
    }

    /// Timestamps of every frame pulled so far.
    pub fn played(&self) -> Vec<u64> {
        self.played.lock().clone()
    }

    pub fn played_count(&self) -> usize {
        self.played.lock().len()
    }
}

#[async_trait]
impl AudioTransport for MockTransport {
    async fn open(&self, destination: &str) -> TransportResult<()> {
        self.opened.lock().push(destination.to_string());
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_frame_supplier(&self, supplier: Option<Arc<dyn FrameSupplier>>) {
        *self.supplier.lock() = supplier;
    }

    async fn set_speaking(&self, speaking: bool) -> TransportResult<()> {
        self.speaking.store(speaking, Ordering::SeqCst);
        Ok(())
    }

    async fn set_status_text(&self, destination: &str, text: &str) -> TransportResult<()> {
        self.status_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_statuses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::StatusUpdate("injected failure".into()));
        }
        self.statuses
            .lock()
            .push((destination.to_string(), text.to_string()));
        Ok(())
    }
}

/// Hands out one polling [`MockTransport`] per group.
#[derive(Default)]
pub struct MockConnector {
    transports: DashMap<String, Arc<MockTransport>>,
    pub connects: AtomicUsize,
}

impl MockConnector {
    pub fn transport(&self, group_id: &str) -> Option<Arc<MockTransport>> {
        self.transports.get(group_id).map(|t| t.clone())
    }
}

impl TransportConnector for MockConnector {
    fn connect(&self, group_id: &str) -> Arc<dyn AudioTransport> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let transport = MockTransport::new();
        transport.start_polling();
        self.transports
            .insert(group_id.to_string(), transport.clone());
        transport
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<BroadcastEvent>>,
}

impl RecordingEmitter {
    pub fn events(&self) -> Vec<BroadcastEvent> {
        self.events.lock().clone()
    }

    /// URLs of every started track, in order.
    pub fn started_urls(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BroadcastEvent::Track(TrackEvent::Started { url, .. }) => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(title, skipped)` of every finished track, in order.
    pub fn finished(&self) -> Vec<(String, bool)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BroadcastEvent::Track(TrackEvent::Finished { title, skipped, .. }) => {
                    Some((title.clone(), *skipped))
                }
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&BroadcastEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit_track(&self, event: TrackEvent) {
        self.events.lock().push(event.into());
    }

    fn emit_session(&self, event: SessionEvent) {
        self.events.lock().push(event.into());
    }
}

/// Polls `condition` every 5 ms until it holds; panics after `timeout`.
pub async fn wait_until(what: &str, timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
