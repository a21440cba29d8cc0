//! Pre-recorded clips and per-session cursors into them.
//!
//! A [`Clip`] is loaded once, never mutated, and shared by every session
//! that streams it. Sessions read it through their own [`ClipCursor`].
//!
//! ## File formats
//!
//! Clips are stored as a flat sequence of length-prefixed frames:
//!
//! | Extension | Frame prefix |
//! |-----------|--------------|
//! | `.mjpeg`, `.mjpg` | 5 ASCII decimal digits (classic lab MJPEG) |
//! | anything else | big-endian `u32` |

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::{Frame, FrameSource, MediaFormat};
use crate::error::{Result, RtspError};

const ASCII_PREFIX_LEN: usize = 5;

/// An immutable, shareable list of encoded frames.
#[derive(Debug)]
pub struct Clip {
    name: String,
    format: MediaFormat,
    frames: Vec<Arc<[u8]>>,
}

impl Clip {
    /// Build a clip from already-split frames. Rejects an empty frame list.
    pub fn new(name: &str, format: MediaFormat, frames: Vec<Vec<u8>>) -> Result<Self> {
        if frames.is_empty() {
            return Err(invalid(name, "clip has no frames"));
        }
        Ok(Self {
            name: name.to_string(),
            format,
            frames: frames.into_iter().map(Arc::from).collect(),
        })
    }

    /// Parse a file in the 5-digit ASCII length-prefixed MJPEG layout.
    pub fn from_mjpeg_bytes(name: &str, format: MediaFormat, data: &[u8]) -> Result<Self> {
        let frames = split_frames(name, data, ASCII_PREFIX_LEN, |prefix| {
            std::str::from_utf8(prefix)
                .ok()
                .and_then(|s| s.trim().parse::<usize>().ok())
        })?;
        Self::new(name, format, frames)
    }

    /// Parse a file where every frame is preceded by a big-endian `u32` length.
    pub fn from_length_prefixed(name: &str, format: MediaFormat, data: &[u8]) -> Result<Self> {
        let frames = split_frames(name, data, 4, |prefix| {
            let len: [u8; 4] = prefix.try_into().ok()?;
            Some(u32::from_be_bytes(len) as usize)
        })?;
        Self::new(name, format, frames)
    }

    /// Load a clip from disk, picking the layout from the file extension.
    pub fn open(path: &Path, format: MediaFormat) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| invalid(&path.display().to_string(), "file name is not UTF-8"))?;
        let data = std::fs::read(path)?;

        let is_mjpeg = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("mjpeg") || e.eq_ignore_ascii_case("mjpg"));

        let clip = if is_mjpeg {
            Self::from_mjpeg_bytes(name, format, &data)?
        } else {
            Self::from_length_prefixed(name, format, &data)?
        };

        tracing::debug!(
            name,
            frames = clip.frame_count(),
            bytes = data.len(),
            "clip loaded"
        );
        Ok(clip)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> &MediaFormat {
        &self.format
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Playback length at the nominal frame rate.
    pub fn duration(&self) -> Duration {
        let units = self.format.frame_duration as u64 * self.frames.len() as u64;
        if self.format.clock_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(units * 1_000_000_000 / self.format.clock_rate as u64)
    }

    /// A fresh cursor positioned on the first frame.
    pub fn cursor(self: &Arc<Self>) -> ClipCursor {
        ClipCursor {
            clip: Arc::clone(self),
            index: 0,
        }
    }
}

/// Session-private read position into a shared [`Clip`].
#[derive(Debug, Clone)]
pub struct ClipCursor {
    clip: Arc<Clip>,
    index: usize,
}

impl ClipCursor {
    /// Index of the frame the next call will return.
    pub fn position(&self) -> usize {
        self.index
    }
}

impl FrameSource for ClipCursor {
    fn next_frame(&mut self) -> Option<Frame> {
        let payload = self.clip.frames.get(self.index)?.clone();
        self.index += 1;
        Some(Frame {
            payload,
            duration: self.clip.format.frame_duration,
        })
    }

    fn rewind(&mut self) {
        self.index = 0;
    }
}

fn split_frames(
    name: &str,
    data: &[u8],
    prefix_len: usize,
    parse_len: impl Fn(&[u8]) -> Option<usize>,
) -> Result<Vec<Vec<u8>>> {
    let mut frames = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let prefix = data
            .get(offset..offset.saturating_add(prefix_len))
            .ok_or_else(|| invalid(name, &format!("truncated length prefix at byte {offset}")))?;
        let len = parse_len(prefix).ok_or_else(|| {
            invalid(
                name,
                &format!("unreadable length prefix for frame {}", frames.len()),
            )
        })?;
        offset += prefix_len;

        let frame = offset
            .checked_add(len)
            .and_then(|end| data.get(offset..end))
            .ok_or_else(|| {
                invalid(
                    name,
                    &format!("frame {} truncated ({len} bytes declared)", frames.len()),
                )
            })?;
        frames.push(frame.to_vec());
        offset += len;
    }

    Ok(frames)
}

fn invalid(name: &str, reason: &str) -> RtspError {
    RtspError::InvalidMedia {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mjpeg_file(frames: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for f in frames {
            out.extend_from_slice(format!("{:05}", f.len()).as_bytes());
            out.extend_from_slice(f);
        }
        out
    }

    #[test]
    fn parse_mjpeg_layout() {
        let data = mjpeg_file(&[&b"\xFF\xD8one\xFF\xD9"[..], &b"\xFF\xD8two!\xFF\xD9"[..]]);
        let clip = Clip::from_mjpeg_bytes("movie.mjpeg", MediaFormat::mjpeg(20), &data).unwrap();
        assert_eq!(clip.frame_count(), 2);
        assert_eq!(clip.name(), "movie.mjpeg");
        assert_eq!(clip.duration(), Duration::from_millis(100));
    }

    #[test]
    fn parse_u32_layout() {
        let mut data = Vec::new();
        for f in [&b"abc"[..], &b""[..], &b"defgh"[..]] {
            data.extend_from_slice(&(f.len() as u32).to_be_bytes());
            data.extend_from_slice(f);
        }
        let clip = Clip::from_length_prefixed("clip.bin", MediaFormat::default(), &data).unwrap();
        assert_eq!(clip.frame_count(), 3);

        let clip = Arc::new(clip);
        let mut cursor = clip.cursor();
        assert_eq!(&*cursor.next_frame().unwrap().payload, b"abc");
        assert_eq!(cursor.next_frame().unwrap().payload.len(), 0);
        assert_eq!(&*cursor.next_frame().unwrap().payload, b"defgh");
    }

    #[test]
    fn truncated_frame_rejected() {
        let mut data = 10u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"short");
        assert!(matches!(
            Clip::from_length_prefixed("clip.bin", MediaFormat::default(), &data),
            Err(RtspError::InvalidMedia { .. })
        ));
    }

    #[test]
    fn bad_ascii_prefix_rejected() {
        assert!(Clip::from_mjpeg_bytes("x.mjpeg", MediaFormat::default(), b"12a45hello").is_err());
    }

    #[test]
    fn empty_clip_rejected() {
        assert!(Clip::from_length_prefixed("clip.bin", MediaFormat::default(), &[]).is_err());
    }

    #[test]
    fn cursors_are_independent() {
        let clip = Arc::new(
            Clip::new(
                "c",
                MediaFormat::mjpeg(30),
                vec![vec![1], vec![2], vec![3]],
            )
            .unwrap(),
        );
        let mut a = clip.cursor();
        let mut b = clip.cursor();

        assert_eq!(a.next_frame().unwrap().payload[0], 1);
        assert_eq!(a.next_frame().unwrap().payload[0], 2);
        assert_eq!(b.next_frame().unwrap().payload[0], 1);
        assert_eq!(a.position(), 2);
        assert_eq!(b.position(), 1);
    }

    #[test]
    fn end_of_stream_and_rewind() {
        let clip = Arc::new(Clip::new("c", MediaFormat::mjpeg(30), vec![vec![7]]).unwrap());
        let mut cursor = clip.cursor();
        let frame = cursor.next_frame().unwrap();
        assert_eq!(frame.duration, 3000);
        assert!(cursor.next_frame().is_none());
        assert!(cursor.next_frame().is_none());

        cursor.rewind();
        assert_eq!(cursor.next_frame().unwrap().payload[0], 7);
    }
}
