//! The seam to the real-time audio transport.
//!
//! The transport pulls one frame every 20 ms through a [`FrameSupplier`].
//! [`frame_buffer`] connects that pull side to the transcoder's push side
//! with a bounded channel: when the transport stops consuming (paused, or
//! just slower than the decoder) the buffer fills and the transcoder thread
//! blocks on it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::error::{TranscodeError, TranscodeResult, TransportResult};
use crate::transcode::EncodedFrame;

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Result of one transport poll.
#[derive(Debug, Clone)]
pub enum FramePoll {
    /// The next frame to send.
    Frame(EncodedFrame),
    /// Nothing to send right now; the transport sends silence.
    Silence,
    /// The current track is over.
    End,
}

/// Pull side handed to the transport.
pub trait FrameSupplier: Send + Sync {
    /// Called by the transport once per 20 ms tick. Must not block.
    fn poll_frame(&self) -> FramePoll;
}

/// Real-time audio connection for one session.
#[async_trait]
pub trait AudioTransport: Send + Sync {
    /// Joins the destination channel.
    async fn open(&self, destination: &str) -> TransportResult<()>;

    /// Leaves the current channel.
    async fn close(&self) -> TransportResult<()>;

    /// Installs (or removes) the source polled on every tick.
    fn set_frame_supplier(&self, supplier: Option<Arc<dyn FrameSupplier>>);

    async fn set_speaking(&self, speaking: bool) -> TransportResult<()>;

    /// Sets the status line shown on the destination.
    async fn set_status_text(&self, destination: &str, text: &str) -> TransportResult<()>;
}

/// Creates the transport a new session will use.
pub trait TransportConnector: Send + Sync {
    fn connect(&self, group_id: &str) -> Arc<dyn AudioTransport>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame buffer
// ─────────────────────────────────────────────────────────────────────────────

/// Creates a connected push/pull pair holding at most `capacity` frames.
pub fn frame_buffer(capacity: usize) -> (FrameSink, Arc<FrameSource>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (drained, _) = watch::channel(false);
    let source = Arc::new(FrameSource {
        rx: Mutex::new(rx),
        paused: AtomicBool::new(false),
        ended: AtomicBool::new(false),
        min_epoch: AtomicU32::new(0),
        drained,
    });
    (FrameSink { tx }, source)
}

/// Push side, used from the blocking transcoder thread.
pub struct FrameSink {
    tx: mpsc::Sender<Option<EncodedFrame>>,
}

impl FrameSink {
    /// Hands over one frame, or `None` as the end marker. Blocks while the
    /// buffer is full.
    ///
    /// Must not be called from an async context.
    ///
    /// # Errors
    ///
    /// `ConsumerClosed` once the source has been closed.
    pub fn push(&self, frame: Option<EncodedFrame>) -> TranscodeResult<()> {
        self.tx
            .blocking_send(frame)
            .map_err(|_| TranscodeError::ConsumerClosed)
    }
}

/// Pull side, installed on the transport as its [`FrameSupplier`].
pub struct FrameSource {
    rx: Mutex<mpsc::Receiver<Option<EncodedFrame>>>,
    paused: AtomicBool,
    ended: AtomicBool,
    /// Frames from earlier seek epochs are dropped unplayed.
    min_epoch: AtomicU32,
    drained: watch::Sender<bool>,
}

impl FrameSource {
    /// While paused every poll yields silence and nothing is consumed.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Frames currently buffered.
    pub fn buffered(&self) -> usize {
        self.rx.lock().len()
    }

    /// Drops buffered frames produced before seek `epoch`.
    pub fn discard_before(&self, epoch: u32) {
        self.min_epoch.fetch_max(epoch, Ordering::AcqRel);
    }

    /// Rejects further frames and wakes a blocked producer.
    pub fn close(&self) {
        self.rx.lock().close();
        self.mark_drained();
    }

    /// Resolves once the transport has pulled the end marker (or the
    /// source was closed).
    pub async fn wait_drained(&self) {
        let mut rx = self.drained.subscribe();
        let _ = rx.wait_for(|drained| *drained).await;
    }

    fn mark_drained(&self) {
        self.ended.store(true, Ordering::Release);
        self.drained.send_replace(true);
    }
}

impl FrameSupplier for FrameSource {
    fn poll_frame(&self) -> FramePoll {
        if self.ended.load(Ordering::Acquire) {
            return FramePoll::End;
        }
        if self.is_paused() {
            return FramePoll::Silence;
        }
        let min_epoch = self.min_epoch.load(Ordering::Acquire);
        let mut rx = self.rx.lock();
        loop {
            match rx.try_recv() {
                Ok(Some(frame)) if frame.epoch < min_epoch => continue,
                Ok(Some(frame)) => return FramePoll::Frame(frame),
                Ok(None) | Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.mark_drained();
                    return FramePoll::End;
                }
                Err(mpsc::error::TryRecvError::Empty) => return FramePoll::Silence,
            }
        }
    }
}
