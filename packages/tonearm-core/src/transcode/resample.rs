//! Conversion of decoded audio to the fixed 48 kHz stereo profile.
//!
//! Built lazily from the first decoded buffer's rate and channel layout.
//! Input already at the output rate only gets its channels adjusted.

use rubato::{FftFixedIn, Resampler};

use crate::error::{TranscodeError, TranscodeResult};
use crate::protocol_constants::{OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};

/// Input frames per FFT chunk.
const CHUNK_FRAMES: usize = 1024;
const SUB_CHUNKS: usize = 2;

struct FftStage {
    resampler: FftFixedIn<f32>,
    pending: [Vec<f32>; OUTPUT_CHANNELS],
}

/// Planar in, interleaved stereo out.
pub struct StereoResampler {
    input_rate: u32,
    input_channels: usize,
    /// `None` when the input is already at the output rate.
    fft: Option<FftStage>,
}

impl StereoResampler {
    pub fn new(input_rate: u32, input_channels: usize) -> TranscodeResult<Self> {
        if input_rate == 0 || input_channels == 0 {
            return Err(TranscodeError::EncoderSetup(format!(
                "invalid input format: {input_rate} Hz, {input_channels} channels"
            )));
        }

        let fft = if input_rate == OUTPUT_SAMPLE_RATE {
            None
        } else {
            let resampler = FftFixedIn::<f32>::new(
                input_rate as usize,
                OUTPUT_SAMPLE_RATE as usize,
                CHUNK_FRAMES,
                SUB_CHUNKS,
                OUTPUT_CHANNELS,
            )
            .map_err(|e| TranscodeError::EncoderSetup(format!("resampler: {e}")))?;
            Some(FftStage {
                resampler,
                pending: Default::default(),
            })
        };

        log::debug!(
            "[Transcoder] Resampler {} Hz x{} -> {} Hz x{}{}",
            input_rate,
            input_channels,
            OUTPUT_SAMPLE_RATE,
            OUTPUT_CHANNELS,
            if fft.is_none() { " (passthrough)" } else { "" }
        );

        Ok(Self {
            input_rate,
            input_channels,
            fft,
        })
    }

    /// True if this resampler was built for the given input format.
    pub fn matches(&self, rate: u32, channels: usize) -> bool {
        self.input_rate == rate && self.input_channels == channels
    }

    /// Converts one decoded buffer. May return fewer samples than it got
    /// while the FFT stage accumulates a full chunk.
    pub fn process(&mut self, planar: &[&[f32]]) -> TranscodeResult<Vec<f32>> {
        let [left, right] = to_stereo(planar);
        let Some(stage) = self.fft.as_mut() else {
            return Ok(interleave(&left, &right));
        };

        stage.pending[0].extend_from_slice(&left);
        stage.pending[1].extend_from_slice(&right);

        let mut out = Vec::new();
        loop {
            let needed = stage.resampler.input_frames_next();
            if stage.pending[0].len() < needed {
                break;
            }
            let chunk = [&stage.pending[0][..needed], &stage.pending[1][..needed]];
            let resampled = stage
                .resampler
                .process(&chunk[..], None)
                .map_err(|e| TranscodeError::Encode(format!("resample: {e}")))?;
            out.extend(interleave(&resampled[0], &resampled[1]));
            for channel in &mut stage.pending {
                channel.drain(..needed);
            }
        }
        Ok(out)
    }

    /// Pushes out buffered input and the filter tail.
    pub fn flush(&mut self) -> TranscodeResult<Vec<f32>> {
        let Some(stage) = self.fft.as_mut() else {
            return Ok(Vec::new());
        };
        let chunk = [stage.pending[0].as_slice(), stage.pending[1].as_slice()];
        let resampled = stage
            .resampler
            .process_partial(Some(&chunk[..]), None)
            .map_err(|e| TranscodeError::Encode(format!("resample flush: {e}")))?;
        for channel in &mut stage.pending {
            channel.clear();
        }
        Ok(interleave(&resampled[0], &resampled[1]))
    }
}

/// Mono is duplicated; extra channels beyond front left/right are dropped.
fn to_stereo(planar: &[&[f32]]) -> [Vec<f32>; OUTPUT_CHANNELS] {
    match planar {
        [] => [Vec::new(), Vec::new()],
        [mono] => [mono.to_vec(), mono.to_vec()],
        [left, right, ..] => [left.to_vec(), right.to_vec()],
    }
}

fn interleave(left: &[f32], right: &[f32]) -> Vec<f32> {
    let frames = left.len().min(right.len());
    let mut out = Vec::with_capacity(frames * OUTPUT_CHANNELS);
    for (l, r) in left.iter().zip(right) {
        out.push(*l);
        out.push(*r);
    }
    out
}
