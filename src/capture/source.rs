//! Frame sources.
//!
//! Real camera capture lives outside this crate. A source only has to hand
//! over decoded grayscale frames; two are provided here:
//!
//! - [`RawVideoSource`] reads headerless 8-bit grayscale video, e.g.
//!   `ffmpeg -i rtsp://... -pix_fmt gray -f rawvideo -`
//! - [`SyntheticSource`] renders a noisy static scene with optional motion

use crate::core::frame::{Frame, FrameError};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised while producing frames.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("stream ended inside a frame ({read} of {expected} bytes)")]
    TruncatedFrame { read: usize, expected: usize },

    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),
}

/// Push-style supplier of frames, driven by the capture thread.
pub trait FrameSource: Send {
    /// Block until the next frame is available. `Ok(None)` ends the stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

impl FrameSource for Box<dyn FrameSource> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        (**self).next_frame()
    }
}

/// Headerless grayscale video: `width * height` bytes per frame, back to back.
pub struct RawVideoSource<R> {
    reader: R,
    width: u32,
    height: u32,
}

impl<R: Read + Send> RawVideoSource<R> {
    pub fn new(reader: R, width: u32, height: u32) -> Self {
        Self {
            reader,
            width,
            height,
        }
    }
}

impl RawVideoSource<Box<dyn Read + Send>> {
    /// Open a file, or standard input for `-`.
    pub fn open(path: &Path, width: u32, height: u32) -> Result<Self, CaptureError> {
        let reader: Box<dyn Read + Send> = if path == Path::new("-") {
            Box::new(BufReader::new(io::stdin()))
        } else {
            Box::new(BufReader::new(File::open(path)?))
        };
        Ok(Self::new(reader, width, height))
    }
}

impl<R: Read + Send> FrameSource for RawVideoSource<R> {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let expected = self.width as usize * self.height as usize;
        let mut buffer = vec![0u8; expected];
        let mut read = 0;

        while read < expected {
            match self.reader.read(&mut buffer[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        match read {
            0 => Ok(None),
            n if n < expected => Err(CaptureError::TruncatedFrame { read: n, expected }),
            _ => Ok(Some(Frame::new(self.width, self.height, buffer)?)),
        }
    }
}

/// Scripted camera: a textured still scene with sensor-like flicker, and
/// optionally a bright block sweeping across it from a given frame onwards.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_interval: Option<Duration>,
    noise: u8,
    motion_from: Option<u64>,
    frame_limit: Option<u64>,
    index: u64,
    next_due: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_interval: None,
            noise: 2,
            motion_from: None,
            frame_limit: None,
            index: 0,
            next_due: None,
        }
    }

    /// Pace output like a camera running at `fps`.
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.frame_interval = (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
        self
    }

    /// Peak per-pixel flicker amplitude.
    pub fn with_noise(mut self, noise: u8) -> Self {
        self.noise = noise;
        self
    }

    /// Start moving an object through the scene at frame `index`.
    pub fn with_motion_from(mut self, index: u64) -> Self {
        self.motion_from = Some(index);
        self
    }

    /// End the stream after `count` frames.
    pub fn with_frame_limit(mut self, count: u64) -> Self {
        self.frame_limit = Some(count);
        self
    }

    /// Number of frames produced so far.
    pub fn frames_produced(&self) -> u64 {
        self.index
    }

    /// Render frame `index` without advancing the stream.
    pub fn render(&self, index: u64) -> Result<Frame, FrameError> {
        let (w, h) = (self.width as u64, self.height as u64);
        let span = 2 * u32::from(self.noise) + 1;
        let block = self.motion_block(index);
        let mut pixels = Vec::with_capacity((w * h) as usize);

        for y in 0..h {
            for x in 0..w {
                let in_block = block
                    .map(|(bx, by, size)| x >= bx && x < bx + size && y >= by && y < by + size)
                    .unwrap_or(false);
                if in_block {
                    pixels.push(250);
                    continue;
                }
                let base = 40 + (x * 120 / w.max(1)) + (y * 60 / h.max(1));
                let flicker = i64::from(texture_hash(x, y, index) % span) - i64::from(self.noise);
                pixels.push((base as i64 + flicker).clamp(0, 255) as u8);
            }
        }

        Frame::new(self.width, self.height, pixels)
    }

    /// `(x, y, size)` of the moving block at `index`, if motion has begun.
    fn motion_block(&self, index: u64) -> Option<(u64, u64, u64)> {
        let start = self.motion_from?;
        if index < start {
            return None;
        }
        let (w, h) = (self.width as u64, self.height as u64);
        let size = (w.min(h) / 4).max(1);
        let step = (w / 8).max(1);
        let travel = w.saturating_sub(size).max(1);
        let x = ((index - start) * step) % travel;
        Some((x, (h - size) / 2, size))
    }

    fn pace(&mut self) {
        let Some(interval) = self.frame_interval else {
            return;
        };
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + interval);
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.frame_limit.is_some_and(|limit| self.index >= limit) {
            return Ok(None);
        }
        self.pace();
        let frame = self.render(self.index)?;
        self.index += 1;
        Ok(Some(frame))
    }
}

/// Cheap deterministic per-pixel, per-frame scramble.
fn texture_hash(x: u64, y: u64, frame: u64) -> u32 {
    let mut h = (x as u32).wrapping_mul(0x9E37_79B1)
        ^ (y as u32).wrapping_mul(0x85EB_CA77)
        ^ (frame as u32).wrapping_mul(0xC2B2_AE3D);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2C1B_3C6D);
    h ^ (h >> 12)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::mean_absolute_difference;
    use std::io::Cursor;

    #[test]
    fn test_raw_source_reads_frames() {
        let bytes: Vec<u8> = (0..12).collect();
        let mut source = RawVideoSource::new(Cursor::new(bytes), 3, 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.pixels(), &[0, 1, 2, 3, 4, 5]);
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.pixels(), &[6, 7, 8, 9, 10, 11]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_raw_source_truncated_frame() {
        let mut source = RawVideoSource::new(Cursor::new(vec![0u8; 10]), 3, 2);

        source.next_frame().unwrap().unwrap();
        assert!(matches!(
            source.next_frame(),
            Err(CaptureError::TruncatedFrame {
                read: 4,
                expected: 6
            })
        ));
    }

    #[test]
    fn test_synthetic_frame_limit() {
        let mut source = SyntheticSource::new(16, 16).with_frame_limit(3);
        let mut count = 0;
        while source.next_frame().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(source.frames_produced(), 3);
    }

    #[test]
    fn test_synthetic_is_deterministic() {
        let source = SyntheticSource::new(32, 24).with_motion_from(2);
        assert_eq!(source.render(5).unwrap(), source.render(5).unwrap());
    }

    #[test]
    fn test_motion_changes_scene_more_than_noise() {
        let source = SyntheticSource::new(64, 48).with_noise(2).with_motion_from(10);

        let still = mean_absolute_difference(&source.render(3).unwrap(), &source.render(4).unwrap());
        let moving =
            mean_absolute_difference(&source.render(10).unwrap(), &source.render(9).unwrap());

        assert!(still <= 4.0);
        assert!(moving > still * 2.0, "moving {moving} vs still {still}");
    }
}
