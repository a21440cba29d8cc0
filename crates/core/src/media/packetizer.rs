use super::MediaFormat;
use super::rtp::{RTP_HEADER_LEN, RtpHeader};
use crate::error::{Result, RtspError};

/// Default RTP payload bytes per datagram, keeping packets under a 1500-byte MTU.
pub const DEFAULT_MAX_PAYLOAD: usize = 1400;

/// Splits encoded frames into RTP packets for one session.
///
/// Frames are treated as opaque bytes:
///
/// - A frame that fits in `max_payload` goes out as a single packet.
/// - A larger frame is cut into `ceil(len / max_payload)` fragments sent
///   back to back. Every fragment carries the same timestamp and
///   consecutive sequence numbers.
/// - The marker bit is set on the last packet of each frame only.
///
/// The timestamp advances by the frame's duration after the frame, so it
/// tracks media time rather than the moment packets leave the socket.
#[derive(Debug)]
pub struct FramePacketizer {
    header: RtpHeader,
    max_payload: usize,
}

impl FramePacketizer {
    /// Create with explicit SSRC and counters.
    pub fn new(
        format: &MediaFormat,
        ssrc: u32,
        initial_sequence: u16,
        initial_timestamp: u32,
        max_payload: usize,
    ) -> Self {
        Self {
            header: RtpHeader::new(
                format.payload_type,
                ssrc,
                initial_sequence,
                initial_timestamp,
            ),
            max_payload,
        }
    }

    /// Create with random SSRC, sequence number and timestamp.
    pub fn random(format: &MediaFormat, max_payload: usize) -> Self {
        Self {
            header: RtpHeader::random(format.payload_type),
            max_payload,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    pub fn payload_type(&self) -> u8 {
        self.header.pt
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Sequence number of the next packet (for the `RTP-Info` header).
    pub fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    /// Timestamp of the next frame (for the `RTP-Info` header).
    pub fn next_rtp_timestamp(&self) -> u32 {
        self.header.timestamp()
    }

    /// Check that at least one payload byte fits in a packet.
    pub fn validate(&self) -> Result<()> {
        if self.max_payload == 0 {
            return Err(RtspError::OversizeFrame {
                limit: self.max_payload,
            });
        }
        Ok(())
    }

    /// Packetize one frame and advance the timestamp by `duration`.
    ///
    /// Each returned `Vec<u8>` is a complete RTP packet. An empty frame
    /// still produces one (header-only) packet so the receiver sees the
    /// frame boundary.
    pub fn packetize(&mut self, frame: &[u8], duration: u32) -> Result<Vec<Vec<u8>>> {
        self.validate()?;

        let mut packets = Vec::with_capacity(frame.len().div_ceil(self.max_payload).max(1));
        let mut chunks = frame.chunks(self.max_payload).peekable();

        if chunks.peek().is_none() {
            packets.push(self.header.write(true).to_vec());
        }

        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let hdr = self.header.write(last);
            let mut packet = Vec::with_capacity(RTP_HEADER_LEN + chunk.len());
            packet.extend_from_slice(&hdr);
            packet.extend_from_slice(chunk);
            packets.push(packet);
        }

        tracing::trace!(
            frame_size = frame.len(),
            fragments = packets.len(),
            timestamp = self.header.timestamp(),
            "packetized frame"
        );

        self.header.advance_timestamp(duration);
        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RtpPacket;

    fn make_packetizer(max_payload: usize) -> FramePacketizer {
        FramePacketizer::new(&MediaFormat::mjpeg(30), 0x1234_5678, 100, 9000, max_payload)
    }

    #[test]
    fn small_frame_single_packet() {
        let mut p = make_packetizer(1400);
        let packets = p.packetize(&[0xAB; 500], 3000).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 12 + 500);

        let rtp = RtpPacket::parse(&packets[0]).unwrap();
        assert!(rtp.marker);
        assert_eq!(rtp.sequence, 100);
        assert_eq!(rtp.timestamp, 9000);
        assert_eq!(rtp.payload_type, 26);
        assert_eq!(rtp.ssrc, 0x1234_5678);
    }

    #[test]
    fn large_frame_fragmented() {
        let mut p = make_packetizer(1400);
        let frame: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let packets = p.packetize(&frame, 3000).unwrap();
        assert_eq!(packets.len(), 4); // ceil(5000 / 1400)

        let parsed: Vec<_> = packets.iter().map(|b| RtpPacket::parse(b).unwrap()).collect();
        for (i, rtp) in parsed.iter().enumerate() {
            assert_eq!(rtp.timestamp, 9000, "fragments share one timestamp");
            assert_eq!(rtp.sequence, 100 + i as u16, "sequence numbers consecutive");
            assert_eq!(rtp.marker, i == parsed.len() - 1, "marker only on last fragment");
        }

        let reassembled: Vec<u8> = parsed.iter().flat_map(|p| p.payload.to_vec()).collect();
        assert_eq!(reassembled, frame);
        assert_eq!(parsed[3].payload.len(), 5000 - 3 * 1400);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let mut p = make_packetizer(100);
        let packets = p.packetize(&[1; 300], 3000).unwrap();
        assert_eq!(packets.len(), 3);
        assert!(packets.iter().all(|pkt| pkt.len() == 112));
    }

    #[test]
    fn empty_frame_sends_marker_packet() {
        let mut p = make_packetizer(1400);
        let packets = p.packetize(&[], 3000).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 12);
        assert!(RtpPacket::parse(&packets[0]).unwrap().marker);
        assert_eq!(p.next_rtp_timestamp(), 12_000);
    }

    #[test]
    fn timestamp_advances_per_frame_not_per_packet() {
        let mut p = make_packetizer(10);
        p.packetize(&[0; 95], 3000).unwrap();
        assert_eq!(p.next_sequence(), 110);
        assert_eq!(p.next_rtp_timestamp(), 12_000);

        let second = p.packetize(&[0; 5], 3000).unwrap();
        let rtp = RtpPacket::parse(&second[0]).unwrap();
        assert_eq!(rtp.sequence, 110);
        assert_eq!(rtp.timestamp, 12_000);
    }

    #[test]
    fn sequence_never_repeats_across_wrap() {
        let mut p = FramePacketizer::new(&MediaFormat::mjpeg(30), 1, u16::MAX - 1, 0, 10);
        let packets = p.packetize(&[0; 40], 3000).unwrap();
        let seqs: Vec<u16> = packets
            .iter()
            .map(|b| RtpPacket::parse(b).unwrap().sequence)
            .collect();
        assert_eq!(seqs, vec![u16::MAX - 1, u16::MAX, 0, 1]);
    }

    #[test]
    fn zero_payload_limit_is_oversize() {
        let mut p = make_packetizer(0);
        assert!(matches!(
            p.packetize(&[1, 2, 3], 3000),
            Err(RtspError::OversizeFrame { limit: 0 })
        ));
        // Failed call leaves the counters alone.
        assert_eq!(p.next_sequence(), 100);
        assert_eq!(p.next_rtp_timestamp(), 9000);
    }
}
