//! The per-session send loop.
//!
//! A [`Stream`] bundles everything needed to put a session's media on the
//! wire: frame source, packetizer, socket and destination. While the
//! session is READY the stream sits idle inside it. PLAY moves the stream
//! into a [`SendLoop`] thread; PAUSE or TEARDOWN cancels the loop, joins
//! the thread and gets the stream back with its cursor and RTP counters
//! exactly where they stopped.

use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::cancel::CancelToken;
use crate::error::RtspError;
use crate::media::{FramePacketizer, FrameSource, MediaFormat};
use crate::transport::udp::RtpSocket;

/// How far the loop may fall behind its schedule before it stops trying to
/// catch up and re-anchors on the current time.
const MAX_SCHEDULE_LAG: Duration = Duration::from_secs(1);

/// What a send loop does when its frame source runs dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndOfStream {
    /// Rewind to the first frame and keep sending. RTP counters keep running.
    #[default]
    Loop,
    /// Stop sending; the session drops back to READY.
    Stop,
}

/// Why a send loop ended.
#[derive(Debug)]
pub enum LoopExit {
    /// PAUSE, TEARDOWN, connection loss or server shutdown.
    Cancelled,
    /// Source exhausted under [`EndOfStream::Stop`], or it yields nothing at all.
    EndOfStream,
    /// A datagram could not be sent.
    Transport(RtspError),
}

/// Media state of one session, owned by whoever is currently sending.
pub struct Stream {
    pub(crate) source: Box<dyn FrameSource>,
    pub(crate) packetizer: FramePacketizer,
    pub(crate) socket: RtpSocket,
    pub(crate) destination: SocketAddr,
    pub(crate) format: MediaFormat,
    pub(crate) end_of_stream: EndOfStream,
}

impl Stream {
    pub fn new(
        source: Box<dyn FrameSource>,
        packetizer: FramePacketizer,
        socket: RtpSocket,
        destination: SocketAddr,
        format: MediaFormat,
        end_of_stream: EndOfStream,
    ) -> Self {
        Self {
            source,
            packetizer,
            socket,
            destination,
            format,
            end_of_stream,
        }
    }

    pub fn packetizer(&self) -> &FramePacketizer {
        &self.packetizer
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Move the source back to its first frame. RTP counters are untouched.
    pub fn rewind(&mut self) {
        self.source.rewind();
    }

    /// Send frames until cancelled or the stream ends.
    ///
    /// Pacing targets absolute deadlines (`start + Σ frame durations`), so
    /// time spent packetizing and sending does not accumulate as drift.
    fn pump(&mut self, session_id: &str, cancel: &CancelToken) -> (LoopExit, u64) {
        let mut deadline = Instant::now();
        let mut frames_sent = 0u64;

        loop {
            if cancel.is_cancelled() {
                return (LoopExit::Cancelled, frames_sent);
            }

            let frame = match self.source.next_frame() {
                Some(frame) => frame,
                None if self.end_of_stream == EndOfStream::Loop => {
                    self.source.rewind();
                    match self.source.next_frame() {
                        Some(frame) => {
                            tracing::debug!(session_id, frames_sent, "clip looped");
                            frame
                        }
                        None => return (LoopExit::EndOfStream, frames_sent),
                    }
                }
                None => return (LoopExit::EndOfStream, frames_sent),
            };

            match self.packetizer.packetize(&frame.payload, frame.duration) {
                Ok(packets) => {
                    // A frame already packetized goes out whole, so a pause
                    // never leaves a gap in the sequence numbers.
                    for packet in &packets {
                        if let Err(e) = self.socket.send_to(packet, self.destination) {
                            return (LoopExit::Transport(e), frames_sent);
                        }
                    }
                    frames_sent += 1;
                }
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "dropping frame");
                }
            }

            deadline += self.format.units_to_duration(frame.duration);
            let now = Instant::now();
            if now > deadline + MAX_SCHEDULE_LAG {
                tracing::debug!(
                    session_id,
                    lag = ?(now - deadline),
                    "send loop behind schedule, re-anchoring"
                );
                deadline = now;
            }

            if cancel.wait_until(deadline) {
                return (LoopExit::Cancelled, frames_sent);
            }
        }
    }
}

/// A running send loop: the thread that owns the [`Stream`] while PLAYING.
pub struct SendLoop {
    cancel: CancelToken,
    handle: JoinHandle<(Stream, LoopExit)>,
}

impl SendLoop {
    /// Move `stream` into a new thread and start sending immediately.
    pub fn spawn(session_id: &str, mut stream: Stream) -> Self {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let session_id = session_id.to_string();

        let handle = thread::spawn(move || {
            tracing::info!(
                session_id,
                destination = %stream.destination,
                sequence = stream.packetizer.next_sequence(),
                "send loop started"
            );
            let (exit, frames_sent) = stream.pump(&session_id, &token);
            match &exit {
                LoopExit::Transport(e) => {
                    tracing::error!(session_id, frames_sent, error = %e, "send loop failed")
                }
                _ => tracing::info!(session_id, frames_sent, ?exit, "send loop stopped"),
            }
            (stream, exit)
        });

        Self { cancel, handle }
    }

    /// Whether the loop ended on its own (end-of-stream or send failure).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the loop and wait for its thread to exit.
    ///
    /// Once this returns, the loop has sent its last datagram. Returns
    /// `None` only if the thread panicked, in which case the stream is lost.
    pub fn stop(self) -> Option<(Stream, LoopExit)> {
        self.cancel.cancel();
        match self.handle.join() {
            Ok(result) => Some(result),
            Err(_) => {
                tracing::error!("send loop thread panicked");
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::media::rtp::RtpPacket;
    use crate::media::{Clip, Frame};
    use std::net::{IpAddr, Ipv4Addr, UdpSocket};
    use std::sync::Arc;

    pub(crate) fn receiver() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        socket
    }

    pub(crate) fn make_stream(
        frames: Vec<Vec<u8>>,
        fps: u32,
        end_of_stream: EndOfStream,
        destination: SocketAddr,
    ) -> Stream {
        let format = MediaFormat::mjpeg(fps);
        let clip = Arc::new(Clip::new("test.bin", format.clone(), frames).unwrap());
        Stream::new(
            Box::new(clip.cursor()),
            FramePacketizer::new(&format, 0xCAFE, 500, 0, 100),
            RtpSocket::bind(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap(),
            destination,
            format,
            end_of_stream,
        )
    }

    fn recv_packet(socket: &UdpSocket) -> Option<(u16, u32, bool, usize)> {
        let mut buf = [0u8; 2048];
        let n = socket.recv(&mut buf).ok()?;
        let p = RtpPacket::parse(&buf[..n])?;
        Some((p.sequence, p.timestamp, p.marker, p.payload.len()))
    }

    #[test]
    fn stop_policy_ends_loop_at_end_of_stream() {
        let rx = receiver();
        let stream = make_stream(
            vec![vec![1; 250], vec![2; 10]],
            100,
            EndOfStream::Stop,
            rx.local_addr().unwrap(),
        );
        let send_loop = SendLoop::spawn("s1", stream);

        // 250 bytes at 100 bytes/packet: 3 fragments, then 1 packet.
        let got: Vec<_> = (0..4).map(|_| recv_packet(&rx).unwrap()).collect();
        assert_eq!(got[0], (500, 0, false, 100));
        assert_eq!(got[1], (501, 0, false, 100));
        assert_eq!(got[2], (502, 0, true, 50));
        assert_eq!(got[3], (503, 900, true, 10));

        let start = Instant::now();
        while !send_loop.is_finished() {
            assert!(start.elapsed() < Duration::from_secs(2));
            thread::sleep(Duration::from_millis(5));
        }
        let (stream, exit) = send_loop.stop().unwrap();
        assert!(matches!(exit, LoopExit::EndOfStream));
        assert_eq!(stream.packetizer().next_sequence(), 504);
        assert_eq!(stream.packetizer().next_rtp_timestamp(), 1800);
    }

    #[test]
    fn loop_policy_rewinds_with_monotonic_counters() {
        let rx = receiver();
        let stream = make_stream(
            vec![vec![7; 5]],
            200,
            EndOfStream::Loop,
            rx.local_addr().unwrap(),
        );
        let send_loop = SendLoop::spawn("s2", stream);

        let got: Vec<_> = (0..3).map(|_| recv_packet(&rx).unwrap()).collect();
        let (stream, exit) = send_loop.stop().unwrap();
        assert!(matches!(exit, LoopExit::Cancelled));

        assert_eq!(got[0].0, 500);
        assert_eq!(got[1].0, 501);
        assert_eq!(got[2].0, 502);
        assert_eq!(got[1].1, 450);
        assert_eq!(got[2].1, 900);
        assert!(stream.packetizer().next_sequence() >= 503);
    }

    #[test]
    fn stop_is_prompt_and_final() {
        let rx = receiver();
        // 1 fps: the loop spends almost all its time waiting.
        let stream = make_stream(
            vec![vec![0; 4]; 10],
            1,
            EndOfStream::Loop,
            rx.local_addr().unwrap(),
        );
        let send_loop = SendLoop::spawn("s3", stream);
        assert!(recv_packet(&rx).is_some());

        let start = Instant::now();
        let (stream, _) = send_loop.stop().unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));
        let next_seq = stream.packetizer().next_sequence();

        // Nothing may arrive after stop() returned.
        assert!(recv_packet(&rx).is_none());
        assert_eq!(next_seq, 501);
    }

    #[test]
    fn pacing_follows_frame_rate() {
        let rx = receiver();
        let stream = make_stream(
            vec![vec![0; 4]; 100],
            50,
            EndOfStream::Stop,
            rx.local_addr().unwrap(),
        );
        let start = Instant::now();
        let send_loop = SendLoop::spawn("s4", stream);
        for _ in 0..11 {
            recv_packet(&rx).unwrap();
        }
        // 10 intervals of 20 ms after the first frame.
        let elapsed = start.elapsed();
        send_loop.stop();
        assert!(elapsed >= Duration::from_millis(190), "sent too fast: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1000), "sent too slow: {elapsed:?}");
    }

    struct Empty;

    impl FrameSource for Empty {
        fn next_frame(&mut self) -> Option<Frame> {
            None
        }

        fn rewind(&mut self) {}
    }

    #[test]
    fn empty_source_does_not_spin() {
        let rx = receiver();
        let format = MediaFormat::mjpeg(30);
        let stream = Stream::new(
            Box::new(Empty),
            FramePacketizer::new(&format, 1, 0, 0, 100),
            RtpSocket::bind(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap(),
            rx.local_addr().unwrap(),
            format,
            EndOfStream::Loop,
        );
        let send_loop = SendLoop::spawn("s5", stream);
        let (_, exit) = send_loop.stop().unwrap();
        assert!(matches!(exit, LoopExit::EndOfStream | LoopExit::Cancelled));
        assert!(recv_packet(&rx).is_none());
    }
}
