//! Media side of the server: frame sources, clips and RTP packetization.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded video frame is split into one or more RTP packets.
//! Every RTP packet carries a 12-byte fixed header ([`rtp::RtpHeader`])
//! containing:
//!
//! - **Sequence number** (16-bit, wrapping) - for reordering and loss detection.
//! - **Timestamp** (32-bit) - media clock, typically 90 kHz for video.
//! - **SSRC** (32-bit) - randomly chosen to identify the sender.
//! - **Marker bit** - set on the last packet of a frame.
//!
//! Frames are opaque here. Whatever decoder or file reader produced them
//! sits behind the [`FrameSource`] trait, and [`packetizer::FramePacketizer`]
//! only splits bytes.

pub mod clip;
pub mod packetizer;
pub mod rtp;

use std::sync::Arc;
use std::time::Duration;

pub use clip::{Clip, ClipCursor};
pub use packetizer::FramePacketizer;

/// Default video clock rate in Hz (RFC 3551 §4).
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Static payload type for JPEG video (RFC 3551 §6).
pub const JPEG_PAYLOAD_TYPE: u8 = 26;

/// One encoded frame handed to the packetizer.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded image bytes. Shared with the clip, never copied per session.
    pub payload: Arc<[u8]>,
    /// Nominal duration of the frame in RTP clock units.
    pub duration: u32,
}

/// Pull-based supply of encoded frames for one session.
///
/// Implementations are stateful: every call to [`next_frame`](Self::next_frame)
/// advances an internal cursor. Each session owns its own source, so there
/// are never concurrent calls on one instance.
pub trait FrameSource: Send {
    /// Returns the next frame, or `None` at end-of-stream.
    fn next_frame(&mut self) -> Option<Frame>;

    /// Move the cursor back to the first frame.
    fn rewind(&mut self);
}

/// RTP/SDP description of the frames a clip carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    /// RTP payload type number (RFC 3551).
    pub payload_type: u8,
    /// Encoding name for `a=rtpmap` (e.g. `"JPEG"`).
    pub encoding_name: String,
    /// RTP clock rate in Hz.
    pub clock_rate: u32,
    /// Nominal frame duration in clock units.
    pub frame_duration: u32,
}

impl MediaFormat {
    /// Motion JPEG at the given frame rate: PT 26, `JPEG/90000`.
    ///
    /// The frame rate is clamped so a frame lasts at least one clock tick.
    pub fn mjpeg(fps: u32) -> Self {
        let fps = fps.clamp(1, VIDEO_CLOCK_RATE);
        Self {
            payload_type: JPEG_PAYLOAD_TYPE,
            encoding_name: "JPEG".to_string(),
            clock_rate: VIDEO_CLOCK_RATE,
            frame_duration: VIDEO_CLOCK_RATE / fps,
        }
    }

    /// Same format with a different payload type.
    pub fn with_payload_type(mut self, payload_type: u8) -> Self {
        self.payload_type = payload_type & 0x7f;
        self
    }

    /// Wall-clock length of `units` clock ticks.
    pub fn units_to_duration(&self, units: u32) -> Duration {
        if self.clock_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(units as u64 * 1_000_000_000 / self.clock_rate as u64)
    }

    /// SDP media-level attribute lines, `a=` prefix included.
    pub fn sdp_attributes(&self) -> Vec<String> {
        vec![
            format!(
                "a=rtpmap:{} {}/{}",
                self.payload_type, self.encoding_name, self.clock_rate
            ),
            "a=control:track1".to_string(),
        ]
    }
}

impl Default for MediaFormat {
    fn default() -> Self {
        Self::mjpeg(30)
    }
}
