//! Streaming transcoder: decode → resample → reframe → encode.
//!
//! One [`Transcoder`] is bound to one playing track. It walks an explicit
//! state machine:
//!
//! ```text
//! Closed → InputOpen → DecoderReady → EncoderReady → Running
//!                          ↑                            │
//!                          └──────── SeekRestart ←──────┤
//!                                                       ↓
//!                                    Closed ←──── Flushing
//! ```
//!
//! Output timestamps count output-rate samples. They advance by one frame
//! per emitted packet and are reset to the requested target after a seek.
//! The loop is synchronous and meant for `spawn_blocking`; the
//! [`SeekHandle`] is the async side that posts seek requests into it.

mod encoder;
mod fifo;
mod resample;
mod source;
pub mod timebase;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::units::{Time, TimeBase};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::EncoderKind;
use crate::error::{TranscodeError, TranscodeResult};
use crate::protocol_constants::{
    FIFO_CAPACITY_FRAMES, NEARING_END_MAX_SECS, NEARING_END_MIN_SECS, OUTPUT_CHANNELS,
    OUTPUT_SAMPLE_RATE, SEEK_ACK_TIMEOUT_SECS,
};

pub use encoder::{make_encoder, FrameEncoder, PcmEncoder};
#[cfg(feature = "opus")]
pub use encoder::OpusEncoder;
pub use fifo::SampleFifo;
pub use resample::StereoResampler;
pub use source::MediaInput;

use timebase::{duration_to_samples, frames_to_samples, samples_to_ticks};

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderState {
    Closed,
    InputOpen,
    DecoderReady,
    EncoderReady,
    Running,
    SeekRestart,
    Flushing,
}

impl TranscoderState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Closed => "Closed",
            Self::InputOpen => "InputOpen",
            Self::DecoderReady => "DecoderReady",
            Self::EncoderReady => "EncoderReady",
            Self::Running => "Running",
            Self::SeekRestart => "SeekRestart",
            Self::Flushing => "Flushing",
        }
    }
}

/// One encoded 20 ms output packet.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Start of the frame in output-rate samples.
    pub pts: u64,
    /// Samples per channel covered by the frame (960 except possibly the last).
    pub samples: usize,
    /// Number of seeks applied before this frame was produced.
    pub epoch: u32,
    pub data: Bytes,
}

type NearingEndCallback = Box<dyn FnOnce() + Send>;

// ─────────────────────────────────────────────────────────────────────────────
// Seek slot
// ─────────────────────────────────────────────────────────────────────────────

struct PendingSeek {
    id: u64,
    target: u64,
    reply: oneshot::Sender<TranscodeResult<u64>>,
}

#[derive(Default)]
struct SeekSlot {
    pending: Option<PendingSeek>,
    closed: bool,
}

/// State shared between the loop and its [`SeekHandle`]s.
#[derive(Default)]
struct Shared {
    slot: Mutex<SeekSlot>,
    next_id: AtomicU64,
    position: AtomicU64,
    /// Output-rate samples; zero while unknown.
    duration: AtomicU64,
    epoch: AtomicU32,
}

impl Shared {
    fn take_pending(&self) -> Option<PendingSeek> {
        self.slot.lock().pending.take()
    }

    fn close(&self) {
        let mut slot = self.slot.lock();
        slot.closed = true;
        if let Some(pending) = slot.pending.take() {
            let _ = pending.reply.send(Err(TranscodeError::Cancelled));
        }
    }
}

/// Receipt for a posted seek request.
pub struct SeekTicket {
    id: u64,
    target: u64,
    rx: oneshot::Receiver<TranscodeResult<u64>>,
}

impl SeekTicket {
    /// The clamped target the loop will jump to.
    pub fn target(&self) -> u64 {
        self.target
    }

    /// Non-blocking check for the loop's acknowledgement.
    pub fn try_result(&mut self) -> Option<TranscodeResult<u64>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(TranscodeError::Cancelled)),
        }
    }
}

/// Cloneable control handle for a running transcoder.
#[derive(Clone)]
pub struct SeekHandle {
    shared: Arc<Shared>,
    ack_timeout: Duration,
}

impl SeekHandle {
    /// Current output position in output-rate samples.
    pub fn position(&self) -> u64 {
        self.shared.position.load(Ordering::Acquire)
    }

    /// Track duration in output-rate samples, if known.
    pub fn duration(&self) -> Option<u64> {
        match self.shared.duration.load(Ordering::Acquire) {
            0 => None,
            samples => Some(samples),
        }
    }

    /// Seeks applied so far; frames carry the epoch they were produced in.
    pub fn epoch(&self) -> u32 {
        self.shared.epoch.load(Ordering::Acquire)
    }

    /// Clamps a target to `[0, duration]`.
    pub fn clamp(&self, target: i64) -> u64 {
        let target = target.max(0) as u64;
        match self.duration() {
            Some(duration) => target.min(duration),
            None => target,
        }
    }

    /// Posts a seek without waiting. A request still pending is superseded
    /// and its ticket resolves to `Cancelled`.
    pub fn request(&self, target: i64) -> TranscodeResult<SeekTicket> {
        let target = self.clamp(target);
        let (tx, rx) = oneshot::channel();
        let mut slot = self.shared.slot.lock();
        if slot.closed {
            return Err(TranscodeError::InvalidState {
                expected: TranscoderState::Running.name(),
                actual: TranscoderState::Closed.name(),
            });
        }
        if let Some(old) = slot.pending.take() {
            let _ = old.reply.send(Err(TranscodeError::Cancelled));
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        slot.pending = Some(PendingSeek {
            id,
            target,
            reply: tx,
        });
        Ok(SeekTicket { id, target, rx })
    }

    /// Seeks to an absolute target and waits for the loop to apply it.
    ///
    /// # Returns
    ///
    /// The clamped target the output timestamp was reset to.
    ///
    /// # Errors
    ///
    /// `Busy` if the loop does not pick the request up within the
    /// acknowledgement timeout; the request is withdrawn in that case.
    pub async fn seek(&self, target: i64) -> TranscodeResult<u64> {
        let ticket = self.request(target)?;
        let id = ticket.id;

        match tokio::time::timeout(self.ack_timeout, ticket.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TranscodeError::Cancelled),
            Err(_) => {
                let mut slot = self.shared.slot.lock();
                if slot.pending.as_ref().is_some_and(|p| p.id == id) {
                    slot.pending = None;
                }
                Err(TranscodeError::Busy(self.ack_timeout))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transcoder
// ─────────────────────────────────────────────────────────────────────────────

pub struct Transcoder {
    state: TranscoderState,
    encoder_kind: EncoderKind,

    format: Option<Box<dyn FormatReader>>,
    track_id: u32,
    codec_params: Option<CodecParameters>,
    time_base: TimeBase,
    decoder: Option<Box<dyn Decoder>>,
    encoder: Option<Box<dyn FrameEncoder>>,
    resampler: Option<StereoResampler>,
    fifo: SampleFifo,

    timestamp: u64,
    duration_hint: Option<u64>,
    shared: Arc<Shared>,
    ack_timeout: Duration,
    nearing_end: Option<NearingEndCallback>,
    nearing_end_fired: bool,
}

impl Transcoder {
    pub fn new(encoder_kind: EncoderKind) -> Self {
        Self {
            state: TranscoderState::Closed,
            encoder_kind,
            format: None,
            track_id: 0,
            codec_params: None,
            time_base: TimeBase::new(1, OUTPUT_SAMPLE_RATE),
            decoder: None,
            encoder: None,
            resampler: None,
            fifo: SampleFifo::with_capacity(FIFO_CAPACITY_FRAMES),
            timestamp: 0,
            duration_hint: None,
            shared: Arc::new(Shared::default()),
            ack_timeout: Duration::from_secs(SEEK_ACK_TIMEOUT_SECS),
            nearing_end: None,
            nearing_end_fired: false,
        }
    }

    pub fn state(&self) -> TranscoderState {
        self.state
    }

    /// Handle for seeking and position queries from other tasks.
    pub fn seek_handle(&self) -> SeekHandle {
        SeekHandle {
            shared: self.shared.clone(),
            ack_timeout: self.ack_timeout,
        }
    }

    /// How long [`SeekHandle::seek`] waits for the loop. Applies to handles
    /// created afterwards.
    pub fn set_seek_timeout(&mut self, timeout: Duration) {
        self.ack_timeout = timeout;
    }

    /// Duration used when the container does not report one.
    pub fn set_duration_hint(&mut self, duration: Duration) {
        let samples = duration_to_samples(duration);
        self.duration_hint = (samples > 0).then_some(samples);
        if self.shared.duration.load(Ordering::Acquire) == 0 {
            self.shared.duration.store(samples, Ordering::Release);
        }
    }

    /// Track duration in output-rate samples, if known.
    pub fn duration(&self) -> Option<u64> {
        self.seek_handle().duration()
    }

    /// Installs the one-shot nearing-end callback.
    ///
    /// # Errors
    ///
    /// `InvalidState` if a callback was already installed or fired.
    pub fn on_nearing_end(&mut self, callback: NearingEndCallback) -> TranscodeResult<()> {
        if self.nearing_end.is_some() || self.nearing_end_fired {
            return Err(TranscodeError::InvalidState {
                expected: "no nearing-end callback",
                actual: "callback already installed",
            });
        }
        self.nearing_end = Some(callback);
        Ok(())
    }

    fn expect_state(&self, expected: TranscoderState) -> TranscodeResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TranscodeError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Setup
    // ─────────────────────────────────────────────────────────────────────────

    /// Probes the input and selects its first audio track.
    ///
    /// # Errors
    ///
    /// `Unsupported` if no demuxer recognizes the input, `NoAudioStream`
    /// if it holds no decodable track.
    pub fn open_input(&mut self, input: MediaInput) -> TranscodeResult<()> {
        self.expect_state(TranscoderState::Closed)?;
        let description = input.describe();
        let (stream, hint) = input.into_stream()?;

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions {
                    enable_gapless: true,
                    ..Default::default()
                },
                &MetadataOptions::default(),
            )
            .map_err(|e| TranscodeError::Unsupported(e.to_string()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(TranscodeError::NoAudioStream)?;
        let params = track.codec_params.clone();
        self.track_id = track.id;

        let sample_rate = params.sample_rate.unwrap_or(OUTPUT_SAMPLE_RATE);
        self.time_base = params
            .time_base
            .unwrap_or_else(|| TimeBase::new(1, sample_rate));

        let known = params
            .n_frames
            .map(|frames| frames_to_samples(frames, sample_rate))
            .filter(|&samples| samples > 0)
            .or(self.duration_hint)
            .unwrap_or(0);
        self.shared.duration.store(known, Ordering::Release);

        log::info!(
            "[Transcoder] Opened {} (track {}, {} Hz, {:.1}s)",
            description,
            self.track_id,
            sample_rate,
            known as f64 / OUTPUT_SAMPLE_RATE as f64
        );

        self.codec_params = Some(params);
        self.format = Some(format);
        self.state = TranscoderState::InputOpen;
        Ok(())
    }

    /// Binds a decoder for the detected codec.
    pub fn setup_decoder(&mut self) -> TranscodeResult<()> {
        self.expect_state(TranscoderState::InputOpen)?;
        self.build_decoder()?;
        self.state = TranscoderState::DecoderReady;
        Ok(())
    }

    /// Binds the output encoder. The resampler is built later, from the
    /// first decoded buffer.
    pub fn setup_encoder(&mut self) -> TranscodeResult<()> {
        self.expect_state(TranscoderState::DecoderReady)?;
        self.build_encoder()?;
        self.state = TranscoderState::EncoderReady;
        Ok(())
    }

    fn build_decoder(&mut self) -> TranscodeResult<()> {
        let params = self
            .codec_params
            .as_ref()
            .ok_or(TranscodeError::InvalidState {
                expected: TranscoderState::InputOpen.name(),
                actual: self.state.name(),
            })?;
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| TranscodeError::DecoderSetup(e.to_string()))?;
        self.decoder = Some(decoder);
        Ok(())
    }

    fn build_encoder(&mut self) -> TranscodeResult<()> {
        let encoder = make_encoder(self.encoder_kind)?;
        log::debug!("[Transcoder] Encoder: {}", encoder.codec_name());
        self.encoder = Some(encoder);
        self.resampler = None;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Main loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Runs until end of input, cancellation, or an error.
    ///
    /// Every encoded frame is handed to `on_frame(Some(..))`; the end of the
    /// stream is marked by one `on_frame(None)`. An error returned from
    /// `on_frame` stops the loop and is propagated.
    ///
    /// # Errors
    ///
    /// `Cancelled` when `cancel` fires or the input reader is aborted.
    pub fn transcode<F>(&mut self, cancel: &CancellationToken, mut on_frame: F) -> TranscodeResult<()>
    where
        F: FnMut(Option<EncodedFrame>) -> TranscodeResult<()>,
    {
        self.expect_state(TranscoderState::EncoderReady)?;
        self.state = TranscoderState::Running;

        let result = self
            .run(cancel, &mut on_frame)
            .and_then(|()| self.flush(&mut on_frame));

        match &result {
            Ok(()) => log::debug!(
                "[Transcoder] Finished at {:.2}s",
                self.timestamp as f64 / OUTPUT_SAMPLE_RATE as f64
            ),
            Err(e) if e.is_cancellation() => log::debug!("[Transcoder] Stopped: {}", e),
            Err(e) => log::warn!("[Transcoder] Failed: {}", e),
        }
        self.close();
        result
    }

    fn run<F>(&mut self, cancel: &CancellationToken, on_frame: &mut F) -> TranscodeResult<()>
    where
        F: FnMut(Option<EncodedFrame>) -> TranscodeResult<()>,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(TranscodeError::Cancelled);
            }
            if let Some(request) = self.shared.take_pending() {
                self.apply_seek(request)?;
            }

            let Some(packet) = self.next_packet()? else {
                return Ok(());
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            if let Some(samples) = self.decode(&packet)? {
                self.fifo.push(&samples);
            }
            while let Some(frame) = self.fifo.pop_frame() {
                self.emit(&frame, on_frame)?;
            }
        }
    }

    fn next_packet(&mut self) -> TranscodeResult<Option<Packet>> {
        loop {
            let format = self.format.as_mut().ok_or(TranscodeError::InvalidState {
                expected: TranscoderState::Running.name(),
                actual: TranscoderState::Closed.name(),
            })?;
            match format.next_packet() {
                Ok(packet) => return Ok(Some(packet)),
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::ConnectionAborted =>
                {
                    return Err(TranscodeError::Cancelled);
                }
                Err(SymphoniaError::ResetRequired) => {
                    log::debug!("[Transcoder] Stream reset, rebuilding decoder");
                    self.build_decoder()?;
                }
                Err(e) => return Err(TranscodeError::Decode(e.to_string())),
            }
        }
    }

    /// Decodes one packet into interleaved 48 kHz stereo samples.
    fn decode(&mut self, packet: &Packet) -> TranscodeResult<Option<Vec<f32>>> {
        let decoder = self.decoder.as_mut().ok_or(TranscodeError::InvalidState {
            expected: TranscoderState::DecoderReady.name(),
            actual: self.state.name(),
        })?;

        let decoded = match decoder.decode(packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("[Transcoder] Skipping undecodable packet: {}", e);
                return Ok(None);
            }
            Err(SymphoniaError::IoError(e)) => {
                log::warn!("[Transcoder] Skipping packet after I/O error: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(TranscodeError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            return Ok(None);
        }
        let channels = spec.channels.count();
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_planar_ref(decoded);
        let planar: Vec<&[f32]> = buffer.samples().chunks(frames).take(channels).collect();

        let mut out = Vec::new();
        let mut resampler = match self.resampler.take() {
            Some(current) if current.matches(spec.rate, channels) => current,
            previous => {
                if let Some(mut old) = previous {
                    out.extend(old.flush()?);
                }
                StereoResampler::new(spec.rate, channels)?
            }
        };
        out.extend(resampler.process(&planar)?);
        self.resampler = Some(resampler);
        Ok(Some(out))
    }

    /// Encodes one frame, stamps it and advances the running timestamp.
    fn emit<F>(&mut self, samples: &[f32], on_frame: &mut F) -> TranscodeResult<()>
    where
        F: FnMut(Option<EncodedFrame>) -> TranscodeResult<()>,
    {
        let encoder = self.encoder.as_mut().ok_or(TranscodeError::InvalidState {
            expected: TranscoderState::EncoderReady.name(),
            actual: self.state.name(),
        })?;
        let frame_samples = samples.len() / OUTPUT_CHANNELS;
        if let Some(data) = encoder.encode(samples)? {
            on_frame(Some(EncodedFrame {
                pts: self.timestamp,
                samples: frame_samples,
                epoch: self.shared.epoch.load(Ordering::Acquire),
                data,
            }))?;
        }
        self.timestamp += frame_samples as u64;
        self.shared.position.store(self.timestamp, Ordering::Release);
        self.check_nearing_end();
        Ok(())
    }

    fn check_nearing_end(&mut self) {
        if self.nearing_end_fired {
            return;
        }
        let Some(duration) = self.duration() else {
            return;
        };
        let remaining = duration.saturating_sub(self.timestamp);
        if remaining < nearing_end_threshold(duration) {
            self.nearing_end_fired = true;
            if let Some(callback) = self.nearing_end.take() {
                log::debug!(
                    "[Transcoder] Nearing end, {:.1}s left",
                    remaining as f64 / OUTPUT_SAMPLE_RATE as f64
                );
                callback();
            }
        }
    }

    fn flush<F>(&mut self, on_frame: &mut F) -> TranscodeResult<()>
    where
        F: FnMut(Option<EncodedFrame>) -> TranscodeResult<()>,
    {
        self.state = TranscoderState::Flushing;

        if let Some(decoder) = self.decoder.as_mut() {
            decoder.finalize();
        }
        if let Some(resampler) = self.resampler.as_mut() {
            let tail = resampler.flush()?;
            self.fifo.push(&tail);
        }
        while let Some(frame) = self.fifo.pop_frame() {
            self.emit(&frame, on_frame)?;
        }
        if let Some(rest) = self.fifo.drain_remainder() {
            self.emit(&rest, on_frame)?;
        }

        let pending = match self.encoder.as_mut() {
            Some(encoder) => encoder.flush()?,
            None => Vec::new(),
        };
        for data in pending {
            on_frame(Some(EncodedFrame {
                pts: self.timestamp,
                samples: 0,
                epoch: self.shared.epoch.load(Ordering::Acquire),
                data,
            }))?;
        }
        on_frame(None)
    }

    fn close(&mut self) {
        self.shared.close();
        self.format = None;
        self.decoder = None;
        self.encoder = None;
        self.resampler = None;
        self.fifo.clear();
        self.state = TranscoderState::Closed;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Seek
    // ─────────────────────────────────────────────────────────────────────────

    /// Applies a posted seek. Demuxer rejections are reported to the
    /// requester and playback continues; a failed codec rebuild is fatal.
    fn apply_seek(&mut self, request: PendingSeek) -> TranscodeResult<()> {
        self.state = TranscoderState::SeekRestart;

        if let Err(e) = self.seek_input(request.target) {
            log::warn!("[Transcoder] Seek to {} rejected: {}", request.target, e);
            let _ = request.reply.send(Err(e));
            self.state = TranscoderState::Running;
            return Ok(());
        }

        let rebuilt = self.build_decoder().and_then(|()| {
            self.state = TranscoderState::DecoderReady;
            self.build_encoder()
        });
        if let Err(e) = rebuilt {
            let _ = request.reply.send(Err(TranscodeError::Seek(e.to_string())));
            return Err(e);
        }

        self.fifo.clear();
        self.timestamp = request.target;
        self.shared.position.store(request.target, Ordering::Release);
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);
        self.state = TranscoderState::Running;

        log::debug!(
            "[Transcoder] Seeked to {:.2}s",
            request.target as f64 / OUTPUT_SAMPLE_RATE as f64
        );
        let _ = request.reply.send(Ok(request.target));
        Ok(())
    }

    fn seek_input(&mut self, target: u64) -> TranscodeResult<()> {
        let ts = samples_to_ticks(target, self.time_base);
        let track_id = self.track_id;
        let format = self.format.as_mut().ok_or(TranscodeError::InvalidState {
            expected: TranscoderState::Running.name(),
            actual: TranscoderState::Closed.name(),
        })?;

        match format.seek(SeekMode::Coarse, SeekTo::TimeStamp { ts, track_id }) {
            Ok(_) => Ok(()),
            Err(e) if target == 0 => {
                log::debug!("[Transcoder] Timestamp seek to 0 failed ({}), retrying by time", e);
                format
                    .seek(
                        SeekMode::Coarse,
                        SeekTo::Time {
                            time: Time::new(0, 0.0),
                            track_id: None,
                        },
                    )
                    .map(|_| ())
                    .map_err(|e| TranscodeError::Seek(e.to_string()))
            }
            Err(e) => Err(TranscodeError::Seek(e.to_string())),
        }
    }
}

impl Drop for Transcoder {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// `clamp(10% of total, 7 s, 20 s)` in output-rate samples.
pub fn nearing_end_threshold(duration: u64) -> u64 {
    let min = NEARING_END_MIN_SECS * OUTPUT_SAMPLE_RATE as u64;
    let max = NEARING_END_MAX_SECS * OUTPUT_SAMPLE_RATE as u64;
    (duration / 10).clamp(min, max)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::protocol_constants::FRAME_SAMPLES;
    use crate::test_support::{wav_bytes, write_wav};

    fn ready(input: MediaInput) -> Transcoder {
        let mut transcoder = Transcoder::new(EncoderKind::Pcm);
        transcoder.open_input(input).unwrap();
        transcoder.setup_decoder().unwrap();
        transcoder.setup_encoder().unwrap();
        transcoder
    }

    fn reader(bytes: Vec<u8>) -> MediaInput {
        MediaInput::Reader {
            source: Box::new(Cursor::new(bytes)),
            extension: Some("wav".to_string()),
        }
    }

    fn collect(transcoder: &mut Transcoder) -> (Vec<EncodedFrame>, usize) {
        let mut frames = Vec::new();
        let mut ends = 0;
        transcoder
            .transcode(&CancellationToken::new(), |frame| {
                match frame {
                    Some(frame) => frames.push(frame),
                    None => ends += 1,
                }
                Ok(())
            })
            .unwrap();
        (frames, ends)
    }

    #[test]
    fn one_second_at_output_rate_is_fifty_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "tone.wav", 48_000, 2, 48_000);
        let mut transcoder = ready(MediaInput::Path(path));
        assert_eq!(transcoder.duration(), Some(48_000));

        let (frames, ends) = collect(&mut transcoder);

        assert_eq!(ends, 1);
        assert_eq!(frames.len(), 50);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.pts, (i * FRAME_SAMPLES) as u64);
            assert_eq!(frame.samples, FRAME_SAMPLES);
            assert_eq!(frame.data.len(), FRAME_SAMPLES * OUTPUT_CHANNELS * 2);
        }
        assert_eq!(transcoder.state(), TranscoderState::Closed);
    }

    #[test]
    fn resampled_mono_input_keeps_timestamps_monotonic() {
        let mut transcoder = ready(reader(wav_bytes(44_100, 1, 44_100)));
        let (frames, ends) = collect(&mut transcoder);

        assert_eq!(ends, 1);
        assert!(frames.len() >= 49, "got {} frames", frames.len());
        assert_eq!(frames[0].pts, 0);
        assert!(frames.windows(2).all(|w| w[1].pts == w[0].pts + w[0].samples as u64));
    }

    #[test]
    fn first_frame_after_seek_starts_at_target() {
        let mut transcoder = ready(reader(wav_bytes(48_000, 2, 96_000)));
        let handle = transcoder.seek_handle();
        let target: i64 = 48_000;

        let mut ticket: Option<SeekTicket> = None;
        let mut pts_at_ack = None;
        let mut last_pts = 0;
        transcoder
            .transcode(&CancellationToken::new(), |frame| {
                let Some(frame) = frame else { return Ok(()) };
                if pts_at_ack.is_none() {
                    if let Some(result) = ticket.as_mut().and_then(SeekTicket::try_result) {
                        assert_eq!(result.unwrap(), target as u64);
                        assert_eq!(frame.epoch, 1);
                        pts_at_ack = Some(frame.pts);
                    }
                }
                if frame.pts == 4 * FRAME_SAMPLES as u64 && ticket.is_none() {
                    ticket = Some(handle.request(target).unwrap());
                }
                last_pts = frame.pts;
                Ok(())
            })
            .unwrap();

        // The first frame seen after the acknowledgement is stamped with the target.
        assert_eq!(pts_at_ack, Some(target as u64));
        assert!(last_pts > target as u64);
    }

    #[test]
    fn seek_targets_are_clamped() {
        let mut transcoder = ready(reader(wav_bytes(48_000, 2, 48_000)));
        let handle = transcoder.seek_handle();
        assert_eq!(handle.clamp(-5), 0);
        assert_eq!(handle.clamp(10 * 48_000), 48_000);

        let mut ticket = None;
        transcoder
            .transcode(&CancellationToken::new(), |frame| {
                if frame.is_some() && ticket.is_none() {
                    ticket = Some(handle.request(10 * 48_000).unwrap());
                }
                Ok(())
            })
            .unwrap();

        let mut ticket = ticket.unwrap();
        assert_eq!(ticket.target(), 48_000);
        assert_eq!(ticket.try_result().unwrap().unwrap(), 48_000);
        // Nothing is left to decode past the end.
        assert_eq!(handle.position(), 48_000);
    }

    #[test]
    fn nearing_end_fires_once_at_threshold() {
        // 10 s at 8 kHz: threshold is the 7 s floor, so it fires past 3 s.
        let mut transcoder = ready(reader(wav_bytes(8_000, 1, 80_000)));
        let handle = transcoder.seek_handle();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_at = Arc::new(AtomicU64::new(0));
        {
            let fired = fired.clone();
            let fired_at = fired_at.clone();
            let handle = handle.clone();
            transcoder
                .on_nearing_end(Box::new(move || {
                    fired.fetch_add(1, Ordering::SeqCst);
                    fired_at.store(handle.position(), Ordering::SeqCst);
                }))
                .unwrap();
        }
        assert!(transcoder.on_nearing_end(Box::new(|| {})).is_err());

        collect(&mut transcoder);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(fired_at.load(Ordering::SeqCst), 3 * 48_000 + FRAME_SAMPLES as u64);
    }

    #[test]
    fn threshold_is_clamped() {
        assert_eq!(nearing_end_threshold(48_000), 7 * 48_000);
        assert_eq!(nearing_end_threshold(120 * 48_000), 12 * 48_000);
        assert_eq!(nearing_end_threshold(3600 * 48_000), 20 * 48_000);
    }

    #[test]
    fn garbage_input_is_unsupported() {
        let mut transcoder = Transcoder::new(EncoderKind::Pcm);
        let err = transcoder
            .open_input(MediaInput::Reader {
                source: Box::new(Cursor::new(vec![0x5au8; 4096])),
                extension: None,
            })
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Unsupported(_)), "{err:?}");
        assert_eq!(transcoder.state(), TranscoderState::Closed);
    }

    #[test]
    fn stages_must_run_in_order() {
        let mut transcoder = Transcoder::new(EncoderKind::Pcm);
        assert!(matches!(
            transcoder.setup_encoder(),
            Err(TranscodeError::InvalidState { expected: "DecoderReady", actual: "Closed" })
        ));
        assert!(transcoder
            .transcode(&CancellationToken::new(), |_| Ok(()))
            .is_err());

        transcoder.open_input(reader(wav_bytes(48_000, 2, 960))).unwrap();
        assert!(transcoder.setup_encoder().is_err());
        transcoder.setup_decoder().unwrap();
        assert_eq!(transcoder.state(), TranscoderState::DecoderReady);
    }

    #[test]
    fn cancellation_stops_the_loop() {
        let mut transcoder = ready(reader(wav_bytes(48_000, 2, 48_000)));
        let cancel = CancellationToken::new();
        let mut seen = 0;
        let err = transcoder
            .transcode(&cancel, |frame| {
                if frame.is_some() {
                    seen += 1;
                    cancel.cancel();
                }
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Cancelled));
        assert!(seen < 50);

        // A closed transcoder rejects further seeks.
        assert!(transcoder.seek_handle().request(0).is_err());
    }

    #[test]
    fn consumer_errors_propagate() {
        let mut transcoder = ready(reader(wav_bytes(48_000, 2, 48_000)));
        let err = transcoder
            .transcode(&CancellationToken::new(), |_| Err(TranscodeError::ConsumerClosed))
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_seek_is_busy() {
        let transcoder = ready(reader(wav_bytes(48_000, 2, 48_000)));
        let handle = transcoder.seek_handle();
        let err = handle.seek(1000).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Busy(_)));
        // The withdrawn request does not linger in the slot.
        assert!(transcoder.shared.slot.lock().pending.is_none());
    }

    #[test]
    fn superseded_request_is_cancelled() {
        let transcoder = ready(reader(wav_bytes(48_000, 2, 48_000)));
        let handle = transcoder.seek_handle();
        let mut first = handle.request(100).unwrap();
        let _second = handle.request(200).unwrap();
        assert!(matches!(first.try_result(), Some(Err(TranscodeError::Cancelled))));
    }
}
