//! Error types for the clip server.

use std::fmt;

use crate::session::SessionState;

/// Errors that can occur in the clip server.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse), [`BadRequest`](Self::BadRequest),
///   [`MethodNotImplemented`](Self::MethodNotImplemented),
///   [`UnsupportedTransport`](Self::UnsupportedTransport).
/// - **Session**: [`UnknownSession`](Self::UnknownSession),
///   [`InvalidStateTransition`](Self::InvalidStateTransition).
/// - **Media**: [`UnknownResource`](Self::UnknownResource),
///   [`InvalidMedia`](Self::InvalidMedia), [`OversizeFrame`](Self::OversizeFrame).
/// - **Transport**: [`Io`](Self::Io), [`Transport`](Self::Transport).
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
///
/// Everything reachable from a client request is recoverable: the handler
/// turns it into an RTSP error response via [`status`](Self::status) and the
/// connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error on the control path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Request parsed but is missing or misusing a required header.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// SETUP or DESCRIBE named a resource that is not in the catalog.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// No session with the given ID exists in the registry.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// The method is not allowed in the session's current state.
    #[error("{method} not valid in state {state:?}")]
    InvalidStateTransition {
        method: &'static str,
        state: SessionState,
    },

    /// Well-formed method token this server does not implement.
    #[error("method not implemented: {0}")]
    MethodNotImplemented(String),

    /// Client asked for a transport other than unicast RTP over UDP.
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// A frame fragment cannot fit the per-packet payload limit.
    #[error("frame fragment does not fit payload limit of {limit} bytes")]
    OversizeFrame { limit: usize },

    /// UDP send failure while delivering RTP.
    #[error("RTP transport error: {0}")]
    Transport(std::io::Error),

    /// A clip file could not be loaded into the catalog.
    #[error("invalid media {name}: {reason}")]
    InvalidMedia { name: String, reason: String },

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

impl RtspError {
    /// RTSP status code and reason phrase reported to the client (RFC 2326 §7.1.1).
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            Self::Parse { .. } | Self::BadRequest(_) => (400, "Bad Request"),
            Self::UnknownResource(_) => (404, "Not Found"),
            Self::UnknownSession(_) => (454, "Session Not Found"),
            Self::InvalidStateTransition { .. } => (455, "Method Not Valid in This State"),
            Self::UnsupportedTransport(_) => (461, "Unsupported Transport"),
            Self::MethodNotImplemented(_) => (501, "Not Implemented"),
            Self::Io(_)
            | Self::OversizeFrame { .. }
            | Self::Transport(_)
            | Self::InvalidMedia { .. }
            | Self::NotStarted
            | Self::AlreadyRunning => (500, "Internal Server Error"),
        }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Method is not an RTSP token (RFC 2326 §15.1).
    InvalidMethod,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was not a decimal number.
    InvalidContentLength,
    /// Request head is not valid UTF-8.
    InvalidEncoding,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidMethod => write!(f, "invalid method token"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
            Self::InvalidEncoding => write!(f, "request is not valid UTF-8"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
