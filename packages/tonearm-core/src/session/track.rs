//! One item of desired playback.
//!
//! A track settles exactly once, as ready or failed. The outcome is stored
//! behind an `Arc` so every waiter sees the same value.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Url;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::download::ReadyMedia;
use crate::error::DownloadError;
use crate::resolver::ResolvedSource;

/// Terminal outcome of a track's pipeline.
pub type TrackOutcome = Result<ReadyMedia, DownloadError>;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// How far the reference has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    /// A URL that still needs metadata or page resolution.
    Unresolved,
    /// A playable source is known.
    Resolved,
    /// Free text that has to go through search.
    NeedsSearch,
}

pub struct Track {
    id: u64,
    reference: String,
    resolution: Mutex<(ResolutionState, Option<ResolvedSource>)>,
    outcome: watch::Sender<Option<Arc<TrackOutcome>>>,
    pipeline_started: AtomicBool,
    released: AtomicBool,
    cancel: CancellationToken,
}

impl Track {
    /// Creates an unresolved track whose token is a child of `parent`.
    pub fn new(reference: &str, parent: &CancellationToken) -> Arc<Self> {
        let state = match Url::parse(reference.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => ResolutionState::Unresolved,
            _ => ResolutionState::NeedsSearch,
        };
        Self::build(reference, state, None, parent)
    }

    /// Creates a track whose source is already known.
    pub fn with_source(
        reference: &str,
        source: ResolvedSource,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        Self::build(reference, ResolutionState::Resolved, Some(source), parent)
    }

    fn build(
        reference: &str,
        state: ResolutionState,
        source: Option<ResolvedSource>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self {
            id: NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed),
            reference: reference.trim().to_string(),
            resolution: Mutex::new((state, source)),
            outcome,
            pipeline_started: AtomicBool::new(false),
            released: AtomicBool::new(false),
            cancel: parent.child_token(),
        })
    }

    /// Process-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub(crate) fn resolution_state(&self) -> ResolutionState {
        self.resolution.lock().0
    }

    pub fn resolved(&self) -> Option<ResolvedSource> {
        self.resolution.lock().1.clone()
    }

    pub fn set_resolved(&self, source: ResolvedSource) {
        *self.resolution.lock() = (ResolutionState::Resolved, Some(source));
    }

    /// Resolved title, or the reference while unresolved.
    pub fn display_title(&self) -> String {
        self.resolution
            .lock()
            .1
            .as_ref()
            .map_or_else(|| self.reference.clone(), |s| s.title.clone())
    }

    /// Claims the right to run the pipeline; true only for the first caller.
    pub fn begin_pipeline(&self) -> bool {
        !self.pipeline_started.swap(true, Ordering::AcqRel)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancels the download and any playback of this track only.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Settles the track as ready. False if it had already settled.
    pub fn mark_ready(&self, ready: ReadyMedia) -> bool {
        self.settle(Ok(ready))
    }

    /// Settles the track as failed. False if it had already settled.
    pub fn mark_error(&self, error: DownloadError) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: TrackOutcome) -> bool {
        let mut pending = Some(outcome);
        self.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = pending.take().map(Arc::new);
            true
        })
    }

    pub fn outcome(&self) -> Option<Arc<TrackOutcome>> {
        self.outcome.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Waits for the track to settle. Callers race this against their own
    /// cancellation.
    pub async fn wait_ready(&self) -> Arc<TrackOutcome> {
        let mut rx = self.outcome.subscribe();
        let settled = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| Arc::new(Err(DownloadError::Cancelled)))
    }

    /// Marks the track released; true only the first time.
    pub fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("reference", &self.reference)
            .field("state", &self.resolution_state())
            .field("ready", &self.is_ready())
            .finish()
    }
}
