//! Background decoding: runs a started pipeline on its own thread and streams
//! frames over a bounded channel.

use std::thread::{self, JoinHandle};

use crossbeam::channel;
use log::debug;

use crate::decode::pipeline::DecoderPipeline;
use crate::media::error::Result;
use crate::media::frame::{AudioFrame, VideoFrame};

/// Frames pulled from a pipeline on a worker thread.
///
/// The worker stops after sending the first error (`EndOfStream` included) or
/// when the receiving side is dropped. `join` hands the pipeline back.
pub struct FrameWorker<T> {
    receiver: channel::Receiver<Result<T>>,
    handle: JoinHandle<DecoderPipeline>,
}

impl FrameWorker<AudioFrame> {
    /// Stream audio chunks, buffering at most `capacity` of them.
    pub fn spawn_audio(pipeline: DecoderPipeline, capacity: usize) -> Self {
        Self::spawn(pipeline, capacity, DecoderPipeline::get_audio_frame)
    }
}

impl FrameWorker<VideoFrame> {
    /// Stream video frames, buffering at most `capacity` of them.
    pub fn spawn_video(pipeline: DecoderPipeline, capacity: usize) -> Self {
        Self::spawn(pipeline, capacity, DecoderPipeline::get_video_frame)
    }
}

impl<T: Send + 'static> FrameWorker<T> {
    fn spawn<F>(mut pipeline: DecoderPipeline, capacity: usize, mut pull: F) -> Self
    where
        F: FnMut(&mut DecoderPipeline) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = channel::bounded(capacity.max(1));

        let handle = thread::spawn(move || {
            loop {
                let result = pull(&mut pipeline);
                let done = result.is_err();
                if tx.send(result).is_err() {
                    debug!("frame worker: receiver dropped");
                    break;
                }
                if done {
                    break;
                }
            }
            pipeline
        });

        Self {
            receiver: rx,
            handle,
        }
    }

    /// Block until the next frame. `None` once the worker has stopped and
    /// everything it sent has been received.
    pub fn recv(&self) -> Option<Result<T>> {
        self.receiver.recv().ok()
    }

    /// Stop the worker and take the pipeline back.
    /// Frames still queued are discarded. `None` if the worker panicked.
    pub fn join(self) -> Option<DecoderPipeline> {
        let Self { receiver, handle } = self;
        drop(receiver);
        handle.join().ok()
    }
}

impl<T: Send + 'static> Iterator for FrameWorker<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::Rational;
    use crate::decode::config::{DecoderConfig, OutputAudioParams, OutputVideoParams};
    use crate::media::format::{PixelFormat, SampleFormat};
    use crate::media::memory::{MemoryMedia, MemorySource};

    fn audio_pipeline() -> DecoderPipeline {
        let mut media = MemoryMedia::new();
        let pcm: Vec<u8> = (0..8000i16).flat_map(|s| s.to_le_bytes()).collect();
        media.add_pcm_audio(SampleFormat::S16, 8000, 1, &pcm, 800);
        let mut source = MemorySource::new();
        source.insert("a.wav", media);

        let config = DecoderConfig {
            audio: OutputAudioParams {
                channels: 1,
                frame_size: 1000,
                sample_rate: 8000,
                format: SampleFormat::S16,
            },
            ..Default::default()
        };
        let mut pipeline = DecoderPipeline::new(source, config);
        pipeline.start("a.wav").unwrap();
        pipeline
    }

    #[test]
    fn test_audio_worker_until_eof() {
        let worker = FrameWorker::spawn_audio(audio_pipeline(), 2);
        let results: Vec<_> = worker.collect();

        assert_eq!(results.len(), 9);
        assert!(results[..8].iter().all(|r| matches!(r, Ok(chunk) if chunk.nb_samples == 1000)));
        assert!(matches!(&results[8], Err(e) if e.is_eof()));
    }

    #[test]
    fn test_join_returns_pipeline() {
        let worker = FrameWorker::spawn_audio(audio_pipeline(), 1);
        let first = worker.recv().unwrap().unwrap();
        assert_eq!(first.pts, Some(0));

        let mut pipeline = worker.join().unwrap();
        assert!(pipeline.is_started());
        pipeline.seek_to(0).unwrap();
        assert_eq!(pipeline.get_audio_frame().unwrap().pts, Some(0));
    }

    #[test]
    fn test_video_worker() {
        let mut media = MemoryMedia::new();
        let frames = vec![crate::media::frame::VideoFrame::alloc(16, 16, PixelFormat::Gray8); 3];
        media.add_raw_video(16, 16, PixelFormat::Gray8, Rational::new(1, 30), &frames);
        let mut source = MemorySource::new();
        source.insert("v.y4m", media);

        let config = DecoderConfig {
            video: OutputVideoParams {
                width: 16,
                height: 16,
                format: PixelFormat::Rgba,
            },
            ..Default::default()
        };
        let mut pipeline = DecoderPipeline::new(source, config);
        pipeline.start("v.y4m").unwrap();

        let worker = FrameWorker::spawn_video(pipeline, 4);
        let frames: Vec<_> = worker.take_while(|r| r.is_ok()).map(|r| r.unwrap()).collect();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.format == PixelFormat::Rgba));
        assert_eq!(frames[1].pts, Some(33_333));
    }
}
