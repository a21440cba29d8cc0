use crate::error::{Result, RtspError};

/// Parsed client-side transport info from the RTSP `Transport` header.
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=8000-8001
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=50312-50313;ssrc=1A2B3C4D
/// ```
///
/// Only unicast RTP over UDP is served. Interleaved TCP and multicast
/// requests are rejected with 461 (RFC 2326 §12.39).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    /// Client's requested RTP port.
    pub client_rtp_port: u16,
    /// Client's requested RTCP port (RTP + 1 if the client gave a single port).
    pub client_rtcp_port: u16,
}

impl TransportHeader {
    /// Parse the `Transport` header value (RFC 2326 §12.39).
    ///
    /// Looks for `client_port=RTP[-RTCP]` among semicolon-separated
    /// parameters. Multiple comma-separated alternatives are tried in order
    /// and the first usable one wins.
    ///
    /// ## Examples
    ///
    /// ```
    /// use vod::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.client_rtp_port, 8000);
    /// assert_eq!(th.client_rtcp_port, 8001);
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_err());
    /// ```
    pub fn parse(header: &str) -> Result<Self> {
        let mut last_err = RtspError::BadRequest("empty Transport header".to_string());

        for alternative in header.split(',') {
            match Self::parse_alternative(alternative.trim()) {
                Ok(th) => return Ok(th),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    fn parse_alternative(alternative: &str) -> Result<Self> {
        let mut parts = alternative.split(';').map(str::trim);
        let protocol = parts.next().unwrap_or("");

        if !matches!(
            protocol.to_ascii_uppercase().as_str(),
            "RTP/AVP" | "RTP/AVP/UDP"
        ) {
            return Err(RtspError::UnsupportedTransport(alternative.to_string()));
        }

        let mut ports = None;
        for part in parts {
            if part.eq_ignore_ascii_case("multicast") || part.starts_with("interleaved=") {
                return Err(RtspError::UnsupportedTransport(alternative.to_string()));
            }
            if let Some(value) = part.strip_prefix("client_port=") {
                ports = Some(parse_port_range(value).ok_or_else(|| {
                    RtspError::BadRequest(format!("invalid client_port: {value}"))
                })?);
            }
        }

        let (client_rtp_port, client_rtcp_port) = ports
            .ok_or_else(|| RtspError::BadRequest("Transport without client_port".to_string()))?;

        Ok(TransportHeader {
            client_rtp_port,
            client_rtcp_port,
        })
    }

    /// Server's `Transport` response value.
    pub fn response_value(&self, server_rtp_port: u16, ssrc: u32) -> String {
        format!(
            "RTP/AVP;unicast;client_port={}-{};server_port={}-{};ssrc={:08X}",
            self.client_rtp_port,
            self.client_rtcp_port,
            server_rtp_port,
            server_rtp_port.wrapping_add(1),
            ssrc
        )
    }
}

fn parse_port_range(value: &str) -> Option<(u16, u16)> {
    let mut split = value.splitn(2, '-');
    let rtp: u16 = split.next()?.trim().parse().ok()?;
    if rtp == 0 {
        return None;
    }
    let rtcp = match split.next() {
        Some(p) => p.trim().parse().ok()?,
        None => rtp.wrapping_add(1),
    };
    Some((rtp, rtcp))
}
