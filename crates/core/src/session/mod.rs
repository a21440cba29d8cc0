//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! An RTSP session is a server-side state object created during SETUP and
//! destroyed by TEARDOWN or loss of the control connection. It tracks:
//!
//! - A unique session ID (hex string, returned in the `Session` header).
//! - The playback state: Init -> Ready <-> Playing.
//! - The client's RTP endpoint, fixed at SETUP.
//! - The media [`Stream`](stream::Stream), or the [`SendLoop`](stream::SendLoop)
//!   that currently owns it.
//!
//! ## Session lifecycle
//!
//! ```text
//! Init    --SETUP-->    Ready
//! Ready   --PLAY-->     Playing   (send loop starts)
//! Playing --PLAY-->     Playing   (acknowledged, no-op)
//! Playing --PAUSE-->    Ready     (send loop stops, counters kept)
//! Ready   --TEARDOWN--> (removed)
//! Playing --TEARDOWN--> (removed, send loop stopped first)
//! TCP disconnect     -> (removed, via cleanup)
//! ```
//!
//! Anything else is answered with 455 and leaves the state alone.

pub mod cancel;
pub mod registry;
pub mod stream;
pub mod transport;

use std::net::SocketAddr;

use crate::error::{Result, RtspError};
use crate::protocol::Method;

pub use cancel::CancelToken;
pub use registry::SessionRegistry;
pub use stream::{EndOfStream, LoopExit, SendLoop, Stream};
pub use transport::TransportHeader;

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP session state machine (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport negotiated yet. Also the terminal state after TEARDOWN.
    Init,
    /// SETUP done, no media flowing.
    Ready,
    /// Media is being delivered to the client.
    Playing,
}

impl SessionState {
    /// State after `method`, or `InvalidStateTransition` if `method` is not
    /// allowed here. Pure: callers commit the result only once the side
    /// effects of the transition have succeeded.
    pub fn apply(self, method: Method) -> Result<SessionState> {
        use SessionState::*;

        match (self, method) {
            (Init, Method::Setup) => Ok(Ready),
            (Ready | Playing, Method::Play) => Ok(Playing),
            (Playing, Method::Pause) => Ok(Ready),
            (Ready | Playing, Method::Teardown) => Ok(Init),
            (state, Method::Options | Method::Describe | Method::GetParameter) => Ok(state),
            (state, method) => Err(RtspError::InvalidStateTransition {
                method: method.as_str(),
                state,
            }),
        }
    }
}

/// `seq` and `rtptime` of the first packet after PLAY (RFC 2326 §12.33).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpInfo {
    pub sequence: u16,
    pub rtptime: u32,
}

/// A single RTSP session (RFC 2326 §3).
///
/// Lives behind a `Mutex` in the [`SessionRegistry`], so control requests
/// for one session are serialized. The send loop never touches this
/// struct: it owns the [`Stream`] while running and hands it back when
/// stopped.
pub struct Session {
    id: String,
    resource: String,
    server_port: u16,
    destination: SocketAddr,
    ssrc: u32,
    timeout_secs: u64,
    state: SessionState,
    stream: Option<Stream>,
    send_loop: Option<SendLoop>,
}

impl Session {
    /// A freshly SETUP session in the Ready state.
    pub fn new(
        id: String,
        resource: &str,
        server_port: u16,
        stream: Stream,
        timeout_secs: u64,
    ) -> Self {
        Session {
            id,
            resource: resource.to_string(),
            server_port,
            destination: stream.destination(),
            ssrc: stream.packetizer().ssrc(),
            timeout_secs,
            state: SessionState::Ready,
            stream: Some(stream),
            send_loop: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resource name fixed at SETUP.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Client RTP endpoint fixed at SETUP.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Current state, after folding in a send loop that ended on its own.
    pub fn state(&mut self) -> SessionState {
        self.reap();
        self.state
    }

    /// Format the `Session` response header value per RFC 2326 §12.37.
    ///
    /// Example: `"1A2B3C4D5E6F7081;timeout=60"`
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }

    /// READY → PLAYING, starting the send loop. PLAY while already playing
    /// is acknowledged without touching the loop and returns `None`.
    pub fn play(&mut self) -> Result<Option<RtpInfo>> {
        self.reap();
        let next = self.state.apply(Method::Play)?;

        if self.state == SessionState::Playing {
            tracing::debug!(session_id = %self.id, "PLAY while already playing");
            return Ok(None);
        }

        let stream = self.stream.take().ok_or_else(stream_lost)?;
        let info = RtpInfo {
            sequence: stream.packetizer().next_sequence(),
            rtptime: stream.packetizer().next_rtp_timestamp(),
        };
        self.send_loop = Some(SendLoop::spawn(&self.id, stream));
        self.transition(next);
        Ok(Some(info))
    }

    /// PLAYING → READY. Returns once the send loop has exited, with the
    /// stream's cursor and RTP counters preserved for the next PLAY.
    pub fn pause(&mut self) -> Result<()> {
        self.reap();
        let next = self.state.apply(Method::Pause)?;
        self.stop_loop();
        self.transition(next);
        Ok(())
    }

    /// READY|PLAYING → terminal. Stops the send loop and closes the RTP
    /// socket. The caller removes the session from the registry.
    pub fn teardown(&mut self) -> Result<()> {
        self.reap();
        let next = self.state.apply(Method::Teardown)?;
        self.release();
        self.transition(next);
        Ok(())
    }

    /// Forced teardown on connection loss or server shutdown.
    pub fn shutdown(&mut self) {
        self.release();
        self.transition(SessionState::Init);
    }

    fn release(&mut self) {
        self.stop_loop();
        // Dropping the stream closes the RTP socket.
        self.stream = None;
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(
                session_id = %self.id,
                old_state = ?self.state,
                new_state = ?next,
                "state transition"
            );
        }
        self.state = next;
    }

    /// Stop the send loop, if any, and take the stream back.
    fn stop_loop(&mut self) -> Option<LoopExit> {
        let send_loop = self.send_loop.take()?;
        let (stream, exit) = send_loop.stop()?;
        self.stream = Some(stream);
        Some(exit)
    }

    /// A loop that ended by itself (end-of-stream or send failure) puts the
    /// session back to READY. A clip played to its end starts over on the
    /// next PLAY.
    fn reap(&mut self) {
        if self.send_loop.as_ref().is_some_and(SendLoop::is_finished) {
            let exit = self.stop_loop();
            if matches!(exit, Some(LoopExit::EndOfStream)) {
                if let Some(stream) = self.stream.as_mut() {
                    stream.rewind();
                }
            }
            tracing::info!(session_id = %self.id, ?exit, "playback ended, session ready");
            self.transition(SessionState::Ready);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_loop();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .field("destination", &self.destination)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn stream_lost() -> RtspError {
    RtspError::Transport(std::io::Error::other("media stream lost"))
}
