//! Reframing FIFO.
//!
//! Decoded packets come in arbitrary sizes; the encoder wants exactly
//! [`FRAME_SAMPLES`] samples per channel. The FIFO holds interleaved stereo
//! `f32` samples and hands them out one output frame at a time.

use std::collections::VecDeque;

use crate::protocol_constants::{FRAME_SAMPLES, OUTPUT_CHANNELS};

const FRAME_LEN: usize = FRAME_SAMPLES * OUTPUT_CHANNELS;

#[derive(Debug)]
pub struct SampleFifo {
    samples: VecDeque<f32>,
}

impl SampleFifo {
    /// Creates a FIFO pre-sized for `frames` output frames.
    pub fn with_capacity(frames: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(frames.max(1) * FRAME_LEN),
        }
    }

    /// Appends interleaved stereo samples.
    pub fn push(&mut self, interleaved: &[f32]) {
        debug_assert_eq!(interleaved.len() % OUTPUT_CHANNELS, 0);
        self.samples.extend(interleaved.iter().copied());
    }

    /// Samples per channel currently buffered.
    pub fn len(&self) -> usize {
        self.samples.len() / OUTPUT_CHANNELS
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Removes exactly one output frame, if buffered.
    pub fn pop_frame(&mut self) -> Option<Vec<f32>> {
        if self.samples.len() < FRAME_LEN {
            return None;
        }
        Some(self.samples.drain(..FRAME_LEN).collect())
    }

    /// Removes whatever is left, possibly a short frame.
    pub fn drain_remainder(&mut self) -> Option<Vec<f32>> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.drain(..).collect())
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
