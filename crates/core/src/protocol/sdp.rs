//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body returned by DESCRIBE responses. The format:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                              ← session name
//! c=IN IP4 <addr>                               ← connection address
//! t=0 0                                         ← timing
//! a=tool:rtsp-vod                               ← server software (§6)
//! a=sendonly                                    ← direction (§6)
//! a=range:npt=0-12.400                          ← clip length (RFC 2326 §C.1.5)
//! m=video 0 RTP/AVP 26                          ← media description
//! a=rtpmap:26 JPEG/90000                        ← codec/clock rate
//! a=control:track1                              ← track control URL
//! ```
//!
//! Origin and session-name fields come from [`ServerConfig`](crate::ServerConfig).

use crate::media::Clip;
use crate::server::ServerConfig;

/// Generate an SDP session description for `clip`, advertising `ip`.
pub fn generate_sdp(clip: &Clip, ip: &str, config: &ServerConfig) -> String {
    let format = clip.format();
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!(
        "o={} {} {} IN IP4 {}",
        config.sdp_username, config.sdp_session_id, config.sdp_session_version, ip
    ));
    sdp.push(format!("s={}", config.sdp_session_name));
    sdp.push(format!("c=IN IP4 {}", ip));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:rtsp-vod".to_string());
    sdp.push("a=sendonly".to_string());
    sdp.push(format!(
        "a=range:npt=0-{:.3}",
        clip.duration().as_secs_f64()
    ));
    sdp.push(format!("m=video 0 RTP/AVP {}", format.payload_type));
    sdp.extend(format.sdp_attributes());

    tracing::trace!(clip = clip.name(), sdp = %sdp.join("\\r\\n"), "generated SDP");

    format!("{}\r\n", sdp.join("\r\n"))
}
