//! Per-destination playback session.
//!
//! A [`Session`] owns the queue, the current track and the playback flags
//! of one group. A single consumer task pops tracks in order, waits for
//! them to become ready and drives a [`Transcoder`] on a blocking thread
//! whose frames reach the transport through a [`frame_buffer`].
//!
//! All mutable state sits behind one short-lived lock that is never held
//! across an `.await`.

mod history;
mod queue;
mod status;
mod track;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PlayerConfig;
use crate::download::{Downloader, ReadyMedia};
use crate::error::{
    DownloadError, ErrorCode, PlayerError, PlayerResult, ResolveError, TranscodeError,
    TranscodeResult,
};
use crate::events::{EventEmitter, SessionEvent, TrackEvent};
use crate::protocol_constants::{FRAME_SAMPLES, OUTPUT_SAMPLE_RATE};
use crate::resolver::{PlayedEntry, ResolvedSource};
use crate::transcode::timebase::samples_to_duration;
use crate::transcode::{SeekHandle, Transcoder};
use crate::transport::{frame_buffer, AudioTransport, FrameSource};
use crate::utils::now_millis;

pub use history::PlayHistory;
pub use queue::{Inserted, QueueMode, TrackQueue};
pub use status::{format_status, StatusBroadcaster, StatusKind};
pub use track::{ResolutionState, Track, TrackOutcome};

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

/// Options accompanying a play request. `None` flags leave the session's
/// current setting untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayOptions {
    pub mode: QueueMode,
    pub autoplay: Option<bool>,
    pub looping: Option<bool>,
}

/// Shared services every session of a process uses.
#[derive(Clone)]
pub struct SessionContext {
    pub downloader: Arc<Downloader>,
    pub emitter: Arc<dyn EventEmitter>,
    pub config: PlayerConfig,
}

/// One queued track as shown to the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub index: usize,
    pub title: String,
    pub reference: String,
    pub ready: bool,
}

/// The playing track and how far it got.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub title: String,
    pub url: String,
    pub source: Option<String>,
    pub duration: Option<Duration>,
    /// Position of the audio the transport has pulled.
    pub position: Duration,
    pub paused: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Playback {
    source: Arc<FrameSource>,
    seek: SeekHandle,
}

impl Playback {
    /// Transcoder position minus what still sits in the buffer.
    fn heard_position(&self) -> u64 {
        let buffered = self.source.buffered() as u64 * FRAME_SAMPLES as u64;
        self.seek.position().saturating_sub(buffered)
    }
}

struct CurrentTrack {
    track: Arc<Track>,
    /// Ends this track only; a child of the session token.
    stop: CancellationToken,
    skipped: bool,
    source: Option<ResolvedSource>,
    playback: Option<Playback>,
    nearing_end: bool,
}

/// Autoplay continuation, keyed by the canonical id it follows.
enum Candidate {
    Idle,
    Pending { after: String },
    Ready { after: String, track: Arc<Track> },
}

struct SessionState {
    destination: String,
    queue: TrackQueue,
    current: Option<CurrentTrack>,
    autoplay: bool,
    looping: bool,
    paused: bool,
    history: PlayHistory,
    status: Option<(StatusKind, String)>,
    candidate: Candidate,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

pub struct Session {
    group_id: String,
    transport: Arc<dyn AudioTransport>,
    ctx: SessionContext,
    state: Mutex<SessionState>,
    /// Signalled whenever the queue gains a track.
    wake: Notify,
    cancel: CancellationToken,
    status: StatusBroadcaster,
    joined: tokio::sync::Mutex<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Session {
    /// Creates a session and starts its queue consumer.
    ///
    /// The consumer keeps the session alive until [`Session::stop`].
    pub fn new(
        group_id: &str,
        destination: &str,
        transport: Arc<dyn AudioTransport>,
        ctx: SessionContext,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let cancel = parent.child_token();
        let status = StatusBroadcaster::spawn(
            transport.clone(),
            ctx.config.status_debounce(),
            ctx.config.status_retry_backoff(),
            cancel.child_token(),
        );
        let state = SessionState {
            destination: destination.to_string(),
            queue: TrackQueue::default(),
            current: None,
            autoplay: false,
            looping: false,
            paused: false,
            history: PlayHistory::new(ctx.config.history_size),
            status: None,
            candidate: Candidate::Idle,
        };

        let session = Arc::new(Self {
            group_id: group_id.to_string(),
            transport,
            ctx,
            state: Mutex::new(state),
            wake: Notify::new(),
            cancel,
            status,
            joined: tokio::sync::Mutex::new(false),
            consumer: Mutex::new(None),
            stopped: AtomicBool::new(false),
        });

        let handle = tokio::spawn(session.clone().run());
        *session.consumer.lock() = Some(handle);
        log::info!(
            "[Session] Created session for group {} in {}",
            group_id,
            destination
        );
        session
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn destination(&self) -> String {
        self.state.lock().destination.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Front-end operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Queues a reference and starts resolving and downloading it.
    ///
    /// # Returns
    ///
    /// The queue index the track landed at.
    ///
    /// # Errors
    ///
    /// - `Resolve` for an empty or known-restricted reference
    /// - `Transport` if the destination could not be joined
    /// - `SessionStopped` after [`Session::stop`]
    pub async fn play(&self, reference: &str, options: PlayOptions) -> PlayerResult<usize> {
        if self.cancel.is_cancelled() {
            return Err(PlayerError::SessionStopped);
        }
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ResolveError::InvalidReference("empty reference".into()).into());
        }
        if self.ctx.downloader.resolver().is_known_restricted(reference) {
            return Err(ResolveError::Restricted(reference.to_string()).into());
        }

        self.ensure_joined().await?;

        if let Some(looping) = options.looping {
            self.set_loop(looping);
        }
        if let Some(autoplay) = options.autoplay {
            self.set_autoplay(autoplay);
        }

        let track = Track::new(reference, &self.cancel);
        self.enqueue(track, options.mode)
    }

    /// Ends the current track early. Never loops the skipped track.
    pub fn skip(&self) -> PlayerResult<()> {
        let mut state = self.state.lock();
        let current = state.current.as_mut().ok_or(PlayerError::NothingPlaying)?;
        current.skipped = true;
        current.stop.cancel();
        log::info!("[Session] Skipping {}", current.track.reference());
        Ok(())
    }

    /// Seeks the current track by `offset_ms` relative to what is being
    /// heard. The target is clamped to the track.
    ///
    /// # Returns
    ///
    /// The position playback continues from.
    ///
    /// # Errors
    ///
    /// `NothingPlaying` when idle, `Seek` if the transcoder rejected the
    /// target or did not acknowledge it in time.
    pub async fn seek(&self, offset_ms: i64) -> PlayerResult<Duration> {
        let playback = self
            .state
            .lock()
            .current
            .as_ref()
            .and_then(|c| c.playback.clone())
            .ok_or(PlayerError::NothingPlaying)?;

        let samples_per_ms = i64::from(OUTPUT_SAMPLE_RATE / 1000);
        let target = (playback.heard_position() as i64)
            .saturating_add(offset_ms.saturating_mul(samples_per_ms));
        let applied = playback.seek.seek(target).await?;
        playback.source.discard_before(playback.seek.epoch());

        let position = samples_to_duration(applied);
        log::info!("[Session] Seeked to {:?}", position);
        Ok(position)
    }

    pub fn list_queue(&self) -> Vec<QueueEntry> {
        self.state
            .lock()
            .queue
            .iter()
            .enumerate()
            .map(|(index, track)| QueueEntry {
                index,
                title: track.display_title(),
                reference: track.reference().to_string(),
                ready: track.is_ready(),
            })
            .collect()
    }

    /// Removes a queued track and releases its download.
    pub fn remove(&self, index: usize) -> PlayerResult<QueueEntry> {
        let track = self
            .state
            .lock()
            .queue
            .remove(index)
            .ok_or(PlayerError::InvalidPosition(index))?;
        let entry = QueueEntry {
            index,
            title: track.display_title(),
            reference: track.reference().to_string(),
            ready: track.is_ready(),
        };
        self.ctx.downloader.release(&track);
        Ok(entry)
    }

    /// Disabling autoplay drops any precomputed continuation.
    pub fn set_autoplay(&self, enabled: bool) {
        let stale = {
            let mut state = self.state.lock();
            state.autoplay = enabled;
            if enabled {
                None
            } else {
                match std::mem::replace(&mut state.candidate, Candidate::Idle) {
                    Candidate::Ready { track, .. } => Some(track),
                    _ => None,
                }
            }
        };
        if let Some(track) = stale {
            self.ctx.downloader.release(&track);
        }
    }

    pub fn set_loop(&self, enabled: bool) {
        self.state.lock().looping = enabled;
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        let state = self.state.lock();
        let current = state.current.as_ref()?;
        let source = current.source.as_ref()?;
        Some(NowPlaying {
            title: source.title.clone(),
            url: source.url.clone(),
            source: source.source.clone(),
            duration: source.duration,
            position: current
                .playback
                .as_ref()
                .map_or(Duration::ZERO, |p| samples_to_duration(p.heard_position())),
            paused: state.paused,
        })
    }

    /// Pauses when the last listener leaves and resumes when one returns.
    ///
    /// While paused the transport receives silence and the transcoder
    /// blocks once the frame buffer is full.
    pub fn on_occupancy_changed(&self, humans: usize) {
        let pause = humans == 0;
        {
            let mut state = self.state.lock();
            if state.paused == pause {
                return;
            }
            state.paused = pause;
            if let Some(playback) = state.current.as_ref().and_then(|c| c.playback.as_ref()) {
                playback.source.set_paused(pause);
            }
        }
        self.refresh_status();

        let timestamp = now_millis();
        let group_id = self.group_id.clone();
        if pause {
            log::info!("[Session] Channel empty, pausing {}", self.group_id);
            self.ctx
                .emitter
                .emit_session(SessionEvent::Paused { group_id, timestamp });
        } else {
            log::info!("[Session] Listeners back, resuming {}", self.group_id);
            self.ctx
                .emitter
                .emit_session(SessionEvent::Resumed { group_id, timestamp });
        }
    }

    /// Rebinds the session to another destination without touching
    /// playback, and re-publishes the status there.
    pub fn relocate(&self, destination: &str) {
        {
            let mut state = self.state.lock();
            if state.destination == destination {
                return;
            }
            log::info!(
                "[Session] Relocating {} from {} to {}",
                self.group_id,
                state.destination,
                destination
            );
            state.destination = destination.to_string();
        }
        self.refresh_status();
        self.ctx.emitter.emit_session(SessionEvent::Relocated {
            group_id: self.group_id.clone(),
            destination: destination.to_string(),
            timestamp: now_millis(),
        });
    }

    /// Blanks the status line right away, bypassing the debounce.
    pub async fn clear_status(&self) {
        let destination = {
            let mut state = self.state.lock();
            state.status = None;
            state.destination.clone()
        };
        self.status.publish(&destination, String::new());
        if let Err(e) = self.transport.set_status_text(&destination, "").await {
            log::warn!("[Session] Failed to clear status in {}: {}", destination, e);
        }
    }

    /// Stops playback, clears the queue and releases every track.
    ///
    /// Idempotent; later calls return immediately.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("[Session] Stopping session for group {}", self.group_id);
        self.cancel.cancel();

        let (tracks, playback) = {
            let mut state = self.state.lock();
            let mut tracks = state.queue.drain();
            let mut playback = None;
            if let Some(current) = state.current.take() {
                playback = current.playback;
                tracks.push(current.track);
            }
            if let Candidate::Ready { track, .. } =
                std::mem::replace(&mut state.candidate, Candidate::Idle)
            {
                tracks.push(track);
            }
            state.status = None;
            (tracks, playback)
        };

        if let Some(playback) = playback {
            playback.source.close();
        }
        for track in &tracks {
            self.ctx.downloader.release(track);
        }

        self.transport.set_frame_supplier(None);
        if let Err(e) = self.transport.set_speaking(false).await {
            log::debug!("[Session] set_speaking(false) failed: {}", e);
        }
        let joined = std::mem::replace(&mut *self.joined.lock().await, false);
        if joined {
            if let Err(e) = self.transport.close().await {
                log::warn!("[Session] Failed to leave destination: {}", e);
            }
        }

        let consumer = self.consumer.lock().take();
        if let Some(consumer) = consumer {
            if let Err(e) = consumer.await {
                log::warn!("[Session] Consumer ended abnormally: {}", e);
            }
        }
        self.status.join().await;

        self.ctx.emitter.emit_session(SessionEvent::Stopped {
            group_id: self.group_id.clone(),
            timestamp: now_millis(),
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue
    // ─────────────────────────────────────────────────────────────────────────

    async fn ensure_joined(&self) -> PlayerResult<()> {
        let mut joined = self.joined.lock().await;
        // stop() cancels before it takes this lock.
        if self.cancel.is_cancelled() {
            return Err(PlayerError::SessionStopped);
        }
        if *joined {
            return Ok(());
        }
        let destination = self.destination();
        self.transport.open(&destination).await?;
        log::info!("[Session] Joined {}", destination);
        *joined = true;
        Ok(())
    }

    fn enqueue(&self, track: Arc<Track>, mode: QueueMode) -> PlayerResult<usize> {
        let (inserted, preempt) = {
            let mut state = self.state.lock();
            if self.cancel.is_cancelled() {
                drop(state);
                self.ctx.downloader.release(&track);
                return Err(PlayerError::SessionStopped);
            }
            let inserted = state.queue.insert(track.clone(), mode);
            let preempt = match (mode, state.current.as_mut()) {
                (QueueMode::Now, Some(current)) => {
                    current.skipped = true;
                    Some(current.stop.clone())
                }
                _ => None,
            };
            (inserted, preempt)
        };

        for displaced in &inserted.displaced {
            self.ctx.downloader.release(displaced);
        }
        if let Some(stop) = preempt {
            stop.cancel();
        }

        let downloader = self.ctx.downloader.clone();
        tokio::spawn({
            let track = track.clone();
            async move { downloader.materialize(track).await }
        });
        self.wake.notify_one();

        log::info!(
            "[Session] Queued {} at {} ({:?})",
            track.reference(),
            inserted.index,
            mode
        );
        self.ctx.emitter.emit_track(TrackEvent::Queued {
            group_id: self.group_id.clone(),
            reference: track.reference().to_string(),
            position: inserted.index,
            timestamp: now_millis(),
        });
        Ok(inserted.index)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Consumer
    // ─────────────────────────────────────────────────────────────────────────

    async fn run(self: Arc<Self>) {
        log::debug!("[Session] Consumer started for {}", self.group_id);
        while let Some((track, stop)) = self.next_track().await {
            self.play_track(track, stop).await;
        }
        log::debug!("[Session] Consumer exited for {}", self.group_id);
    }

    /// Pops the queue head into `current`, waiting while the queue is empty.
    async fn next_track(&self) -> Option<(Arc<Track>, CancellationToken)> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            {
                let mut state = self.state.lock();
                if let Some(track) = state.queue.pop_front() {
                    let stop = self.cancel.child_token();
                    state.current = Some(CurrentTrack {
                        track: track.clone(),
                        stop: stop.clone(),
                        skipped: false,
                        source: None,
                        playback: None,
                        nearing_end: false,
                    });
                    return Some((track, stop));
                }
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = self.wake.notified() => {}
            }
        }
    }

    async fn play_track(self: &Arc<Self>, track: Arc<Track>, stop: CancellationToken) {
        if !track.is_ready() {
            self.set_status(StatusKind::Resolving, track.display_title());
        }

        let outcome = tokio::select! {
            _ = stop.cancelled() => None,
            outcome = track.wait_ready() => Some(outcome),
        };
        let Some(outcome) = outcome else {
            log::debug!("[Session] {} dropped before it was ready", track.reference());
            self.take_current(&track);
            self.ctx.downloader.release(&track);
            return;
        };

        let ready = match outcome.as_ref() {
            Ok(ready) => ready,
            Err(e) => {
                self.take_current(&track);
                self.ctx.downloader.release(&track);
                if !matches!(e, DownloadError::Cancelled) {
                    log::warn!(
                        "[Session] Dropping {} [{}]: {}",
                        track.reference(),
                        e.code(),
                        e
                    );
                    self.emit_failed(&track, e.code(), e.to_string());
                }
                self.clear_if_idle();
                return;
            }
        };

        let source = &ready.source;
        let prefetch = {
            let mut state = self.state.lock();
            if let Some(current) = state.current.as_mut() {
                current.source = Some(source.clone());
            }
            state.history.record(PlayedEntry {
                id: source.canonical_id.clone(),
                normalized_title: source.normalized_title(),
            });
            state.autoplay && state.queue.is_empty()
        };
        self.set_status(StatusKind::NowPlaying, source.title.clone());
        log::info!("[Session] Now playing {:?} ({})", source.title, source.url);
        self.ctx.emitter.emit_track(TrackEvent::Started {
            group_id: self.group_id.clone(),
            title: source.title.clone(),
            url: source.url.clone(),
            source: source.source.clone().unwrap_or_default(),
            duration_ms: source.duration.map(|d| d.as_millis() as u64),
            timestamp: now_millis(),
        });
        if prefetch {
            self.spawn_candidate(source.canonical_id.clone());
        }

        let result = self.stream(ready, &stop).await;
        let skipped = self.take_current(&track);

        match &result {
            Err(e) if !e.is_cancellation() => {
                log::warn!(
                    "[Session] Playback of {:?} failed [{}]: {}",
                    source.title,
                    e.code(),
                    e
                );
                self.emit_failed(&track, e.code(), e.to_string());
            }
            _ => self.ctx.emitter.emit_track(TrackEvent::Finished {
                group_id: self.group_id.clone(),
                title: source.title.clone(),
                skipped,
                timestamp: now_millis(),
            }),
        }

        let requeued = {
            let mut state = self.state.lock();
            let requeue = state.looping
                && !skipped
                && result.is_ok()
                && !ready.media.is_live()
                && !self.cancel.is_cancelled();
            if requeue {
                state.queue.push_front(track.clone());
            }
            requeue
        };
        if requeued {
            log::debug!("[Session] Looping {:?}", source.title);
            self.wake.notify_one();
            return;
        }

        self.ctx.downloader.release(&track);
        if !self.cancel.is_cancelled() {
            self.continue_autoplay(&source.canonical_id).await;
        }
    }

    /// Streams a ready track until it drains, is stopped, or fails.
    async fn stream(self: &Arc<Self>, ready: &ReadyMedia, stop: &CancellationToken) -> TranscodeResult<()> {
        let input = ready.media.open()?;
        let config = &self.ctx.config;
        let (sink, frames) = frame_buffer(config.frame_buffer_frames);

        let mut transcoder = Transcoder::new(config.encoder);
        transcoder.set_seek_timeout(config.seek_timeout());
        if let Some(duration) = ready.source.duration {
            transcoder.set_duration_hint(duration);
        }
        let (nearing_tx, mut nearing_rx) = oneshot::channel();
        transcoder.on_nearing_end(Box::new(move || {
            let _ = nearing_tx.send(());
        }))?;

        {
            let mut state = self.state.lock();
            frames.set_paused(state.paused);
            if let Some(current) = state.current.as_mut() {
                current.playback = Some(Playback {
                    source: frames.clone(),
                    seek: transcoder.seek_handle(),
                });
            }
        }
        self.transport.set_frame_supplier(Some(frames.clone()));
        if let Err(e) = self.transport.set_speaking(true).await {
            log::debug!("[Session] set_speaking(true) failed: {}", e);
        }

        let worker_stop = stop.clone();
        let mut worker = tokio::task::spawn_blocking(move || {
            transcoder.open_input(input)?;
            transcoder.setup_decoder()?;
            transcoder.setup_encoder()?;
            transcoder.transcode(&worker_stop, |frame| sink.push(frame))
        });

        let mut nearing_done = false;
        let result = loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    // Unblocks the producer; the thread winds down on its own.
                    frames.close();
                    break Err(TranscodeError::Cancelled);
                }
                fired = &mut nearing_rx, if !nearing_done => {
                    nearing_done = true;
                    if fired.is_ok() {
                        self.on_nearing_end(&ready.source);
                    }
                }
                _ = frames.wait_drained() => {
                    break match (&mut worker).await {
                        Ok(result) => result,
                        Err(e) => Err(TranscodeError::Decode(format!("transcoder thread failed: {e}"))),
                    };
                }
            }
        };

        {
            let mut state = self.state.lock();
            if let Some(current) = state.current.as_mut() {
                current.playback = None;
            }
        }
        self.transport.set_frame_supplier(None);
        if let Err(e) = self.transport.set_speaking(false).await {
            log::debug!("[Session] set_speaking(false) failed: {}", e);
        }
        result
    }

    /// Clears `current` if it still holds `track`; returns its skip flag.
    fn take_current(&self, track: &Arc<Track>) -> bool {
        let mut state = self.state.lock();
        match state.current.take() {
            Some(current) if Arc::ptr_eq(&current.track, track) => current.skipped,
            other => {
                state.current = other;
                false
            }
        }
    }

    fn emit_failed(&self, track: &Track, code: &str, error: String) {
        self.ctx.emitter.emit_track(TrackEvent::Failed {
            group_id: self.group_id.clone(),
            reference: track.reference().to_string(),
            code: code.to_string(),
            error,
            timestamp: now_millis(),
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Autoplay
    // ─────────────────────────────────────────────────────────────────────────

    fn on_nearing_end(self: &Arc<Self>, source: &ResolvedSource) {
        log::debug!("[Session] Nearing end of {:?}", source.title);
        self.ctx.emitter.emit_track(TrackEvent::NearingEnd {
            group_id: self.group_id.clone(),
            title: source.title.clone(),
            timestamp: now_millis(),
        });

        let (next_title, wants_candidate) = {
            let mut state = self.state.lock();
            if let Some(current) = state.current.as_mut() {
                current.nearing_end = true;
            }
            if let Some(front) = state.queue.front() {
                (Some(front.display_title()), false)
            } else if state.autoplay {
                match &state.candidate {
                    Candidate::Ready { after, track } if *after == source.canonical_id => {
                        (Some(track.display_title()), false)
                    }
                    _ => (None, true),
                }
            } else {
                (None, false)
            }
        };

        if let Some(title) = next_title {
            self.set_status(StatusKind::UpNext, title);
        }
        if wants_candidate {
            self.spawn_candidate(source.canonical_id.clone());
        }
    }

    /// Computes the continuation for `after_id` in the background unless
    /// one is already pending or ready. A stale candidate is released.
    fn spawn_candidate(self: &Arc<Self>, after_id: String) {
        let stale = {
            let mut state = self.state.lock();
            match &state.candidate {
                Candidate::Pending { after } | Candidate::Ready { after, .. }
                    if *after == after_id =>
                {
                    return;
                }
                _ => {}
            }
            std::mem::replace(
                &mut state.candidate,
                Candidate::Pending {
                    after: after_id.clone(),
                },
            )
        };
        if let Candidate::Ready { track, .. } = stale {
            self.ctx.downloader.release(&track);
        }

        let session = self.clone();
        tokio::spawn(async move {
            let track = session.compute_candidate(&after_id).await;
            session.store_candidate(&after_id, track);
        });
    }

    fn store_candidate(&self, after_id: &str, track: Option<Arc<Track>>) {
        let (track, announce) = {
            let mut state = self.state.lock();
            let wanted = state.autoplay
                && !self.cancel.is_cancelled()
                && matches!(&state.candidate, Candidate::Pending { after } if after == after_id);
            match track {
                Some(track) if wanted => {
                    state.candidate = Candidate::Ready {
                        after: after_id.to_string(),
                        track: track.clone(),
                    };
                    let announce = state.queue.is_empty()
                        && state.current.as_ref().is_some_and(|c| {
                            c.nearing_end
                                && c.source.as_ref().is_some_and(|s| s.canonical_id == after_id)
                        });
                    (track, announce)
                }
                Some(track) => {
                    drop(state);
                    self.ctx.downloader.release(&track);
                    return;
                }
                None => {
                    if wanted {
                        state.candidate = Candidate::Idle;
                    }
                    return;
                }
            }
        };

        let downloader = self.ctx.downloader.clone();
        tokio::spawn({
            let track = track.clone();
            async move { downloader.materialize(track).await }
        });
        if announce {
            self.set_status(StatusKind::UpNext, track.display_title());
        }
    }

    async fn compute_candidate(&self, after_id: &str) -> Option<Arc<Track>> {
        let history = self.state.lock().history.snapshot();
        let resolver = self.ctx.downloader.resolver().clone();
        let pick = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            pick = resolver.find_related(after_id, &history) => pick,
        };
        match pick {
            Ok(pick) => {
                log::info!(
                    "[Session] Autoplay candidate after {}: {:?}{}",
                    after_id,
                    pick.title,
                    if pick.fresh { "" } else { " (repeat)" }
                );
                Some(Track::new(&pick.url, &self.cancel))
            }
            Err(e) => {
                log::info!("[Session] No autoplay continuation after {}: {}", after_id, e);
                None
            }
        }
    }

    /// After a track ends: promote or fetch the continuation when the queue
    /// ran dry with autoplay on, otherwise go idle.
    async fn continue_autoplay(&self, after_id: &str) {
        let (promoted, stale) = {
            let mut state = self.state.lock();
            if !state.autoplay || !state.queue.is_empty() {
                drop(state);
                self.clear_if_idle();
                return;
            }
            match std::mem::replace(&mut state.candidate, Candidate::Idle) {
                Candidate::Ready { after, track } if after == after_id => (Some(track), None),
                Candidate::Ready { track, .. } => (None, Some(track)),
                _ => (None, None),
            }
        };
        if let Some(stale) = stale {
            self.ctx.downloader.release(&stale);
        }

        let track = match promoted {
            Some(track) => track,
            None => match self.compute_candidate(after_id).await {
                Some(track) => track,
                None => {
                    self.clear_if_idle();
                    return;
                }
            },
        };
        if let Err(e) = self.enqueue(track, QueueMode::Append) {
            log::debug!("[Session] Autoplay continuation not queued: {}", e);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────────

    fn set_status(&self, kind: StatusKind, title: String) {
        let (destination, text) = {
            let mut state = self.state.lock();
            let text = format_status(kind, &title, state.paused, self.ctx.config.status_max_chars);
            state.status = Some((kind, title));
            (state.destination.clone(), text)
        };
        self.status.publish(&destination, text);
    }

    fn refresh_status(&self) {
        let update = {
            let state = self.state.lock();
            state.status.as_ref().map(|(kind, title)| {
                (
                    state.destination.clone(),
                    format_status(*kind, title, state.paused, self.ctx.config.status_max_chars),
                )
            })
        };
        if let Some((destination, text)) = update {
            self.status.publish(&destination, text);
        }
    }

    fn clear_if_idle(&self) {
        let destination = {
            let mut state = self.state.lock();
            if state.current.is_some() || !state.queue.is_empty() || state.status.is_none() {
                return;
            }
            state.status = None;
            state.destination.clone()
        };
        self.status.publish(&destination, String::new());
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("group_id", &self.group_id)
            .field("destination", &self.destination())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
