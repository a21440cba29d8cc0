//! Network transport layer for RTSP signaling and RTP media delivery.
//!
//! RTSP uses a split transport model:
//!
//! - **TCP** ([`tcp`]): carries RTSP request/response signaling. One TCP
//!   connection per client, with a thread per connection.
//!
//! - **UDP** ([`udp`]): carries RTP media packets. Every session binds its
//!   own ephemeral socket at SETUP and advertises its port as `server_port`.

pub mod tcp;
pub mod udp;

pub use udp::RtpSocket;
