//! Audio FIFO reconciling variable decoder output with fixed-size chunks.

use std::collections::VecDeque;

use crate::media::format::SampleFormat;

/// First-in-first-out buffer of interleaved samples.
/// Only whole sample frames (one sample for every channel) are stored.
#[derive(Debug)]
pub struct AudioFifo {
    buffer: VecDeque<u8>,
    format: SampleFormat,
    channels: u16,
}

impl AudioFifo {
    /// Create a FIFO for `format` (stored packed) with `channels` channels.
    pub fn new(format: SampleFormat, channels: u16) -> Self {
        Self {
            buffer: VecDeque::new(),
            format: format.packed(),
            channels,
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Bytes per sample frame
    pub fn frame_bytes(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// Buffered samples per channel
    pub fn size(&self) -> usize {
        match self.frame_bytes() {
            0 => 0,
            n => self.buffer.len() / n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append interleaved samples. A trailing partial sample frame is dropped.
    pub fn write(&mut self, data: &[u8]) {
        let frame_bytes = self.frame_bytes();
        if frame_bytes == 0 {
            return;
        }
        let whole = data.len() - data.len() % frame_bytes;
        self.buffer.extend(&data[..whole]);
    }

    /// Pop up to `nb_samples` samples per channel, oldest first.
    pub fn read(&mut self, nb_samples: usize) -> Vec<u8> {
        let take = nb_samples.min(self.size()) * self.frame_bytes();
        self.buffer.drain(..take).collect()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut fifo = AudioFifo::new(SampleFormat::S16, 1);
        fifo.write(&[1, 0, 2, 0]);
        fifo.write(&[3, 0]);
        assert_eq!(fifo.size(), 3);
        assert_eq!(fifo.read(2), vec![1, 0, 2, 0]);
        assert_eq!(fifo.read(5), vec![3, 0]);
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_fifo_drops_partial_frames() {
        let mut fifo = AudioFifo::new(SampleFormat::S16, 2);
        fifo.write(&[0u8; 7]);
        assert_eq!(fifo.size(), 1);
        assert_eq!(fifo.frame_bytes(), 4);
    }

    #[test]
    fn test_fifo_stores_planar_as_packed() {
        let fifo = AudioFifo::new(SampleFormat::F32p, 2);
        assert_eq!(fifo.format(), SampleFormat::F32);
        assert_eq!(fifo.channels(), 2);
    }
}
