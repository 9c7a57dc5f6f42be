//! Output frame encoders.
//!
//! The transport receives one encoded packet per 20 ms frame. Raw PCM is
//! always available; Opus is behind the `opus` feature since it links libopus.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::EncoderKind;
use crate::error::{TranscodeError, TranscodeResult};
#[cfg(feature = "opus")]
use crate::protocol_constants::{
    FRAME_SAMPLES, MAX_ENCODED_FRAME_BYTES, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE, TARGET_BITRATE,
};

/// Encodes interleaved stereo `f32` frames.
pub trait FrameEncoder: Send {
    /// Short codec name for logs.
    fn codec_name(&self) -> &'static str;

    /// Encodes one frame; `None` if the encoder buffered it.
    fn encode(&mut self, interleaved: &[f32]) -> TranscodeResult<Option<Bytes>>;

    /// Drains anything still buffered at end of stream.
    fn flush(&mut self) -> TranscodeResult<Vec<Bytes>> {
        Ok(Vec::new())
    }
}

/// Builds the encoder for the configured output codec.
pub fn make_encoder(kind: EncoderKind) -> TranscodeResult<Box<dyn FrameEncoder>> {
    match kind {
        EncoderKind::Pcm => Ok(Box::new(PcmEncoder)),
        #[cfg(feature = "opus")]
        EncoderKind::Opus => Ok(Box::new(OpusEncoder::new()?)),
        #[cfg(not(feature = "opus"))]
        EncoderKind::Opus => Err(TranscodeError::EncoderSetup(
            "built without the `opus` feature".to_string(),
        )),
    }
}

/// 16-bit little-endian interleaved PCM.
#[derive(Debug, Default)]
pub struct PcmEncoder;

impl FrameEncoder for PcmEncoder {
    fn codec_name(&self) -> &'static str {
        "pcm_s16le"
    }

    fn encode(&mut self, interleaved: &[f32]) -> TranscodeResult<Option<Bytes>> {
        let mut out = BytesMut::with_capacity(interleaved.len() * 2);
        for sample in interleaved {
            let clamped = sample.clamp(-1.0, 1.0);
            out.put_i16_le((clamped * i16::MAX as f32).round() as i16);
        }
        Ok(Some(out.freeze()))
    }
}

/// Opus at the target bitrate, one packet per 20 ms frame.
#[cfg(feature = "opus")]
pub struct OpusEncoder {
    inner: opus::Encoder,
    scratch: Vec<u8>,
}

#[cfg(feature = "opus")]
impl OpusEncoder {
    pub fn new() -> TranscodeResult<Self> {
        let mut inner = opus::Encoder::new(
            OUTPUT_SAMPLE_RATE,
            opus::Channels::Stereo,
            opus::Application::Audio,
        )
        .map_err(|e| TranscodeError::EncoderSetup(format!("opus: {e}")))?;
        inner
            .set_bitrate(opus::Bitrate::Bits(TARGET_BITRATE))
            .map_err(|e| TranscodeError::EncoderSetup(format!("opus bitrate: {e}")))?;
        Ok(Self {
            inner,
            scratch: vec![0u8; MAX_ENCODED_FRAME_BYTES],
        })
    }
}

#[cfg(feature = "opus")]
impl FrameEncoder for OpusEncoder {
    fn codec_name(&self) -> &'static str {
        "opus"
    }

    fn encode(&mut self, interleaved: &[f32]) -> TranscodeResult<Option<Bytes>> {
        const FRAME_LEN: usize = FRAME_SAMPLES * OUTPUT_CHANNELS;
        // Opus only takes whole frames; the final short one is zero-padded.
        let padded;
        let input = if interleaved.len() < FRAME_LEN {
            let mut frame = interleaved.to_vec();
            frame.resize(FRAME_LEN, 0.0);
            padded = frame;
            &padded[..]
        } else {
            interleaved
        };
        let len = self
            .inner
            .encode_float(input, &mut self.scratch)
            .map_err(|e| TranscodeError::Encode(format!("opus: {e}")))?;
        Ok(Some(Bytes::copy_from_slice(&self.scratch[..len])))
    }
}
