use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use crate::catalog::MediaCatalog;
use crate::error::{Result, RtspError};
use crate::media::FramePacketizer;
use crate::protocol::request::{Method, RtspRequest};
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::server::ServerConfig;
use crate::session::registry::SessionHandle;
use crate::session::transport::TransportHeader;
use crate::session::{Session, SessionRegistry, SessionState, Stream};
use crate::transport::udp::RtpSocket;

/// Handles RTSP method requests for a single TCP connection.
///
/// Tracks which sessions were created on this connection so they
/// can be torn down when the connection drops.
pub struct MethodHandler {
    registry: SessionRegistry,
    catalog: MediaCatalog,
    client_addr: SocketAddr,
    config: Arc<ServerConfig>,
    /// Session IDs created during this connection, for cleanup on disconnect.
    session_ids: Vec<String>,
}

impl MethodHandler {
    pub fn new(
        registry: SessionRegistry,
        client_addr: SocketAddr,
        catalog: MediaCatalog,
        config: Arc<ServerConfig>,
    ) -> Self {
        MethodHandler {
            registry,
            catalog,
            client_addr,
            config,
            session_ids: Vec::new(),
        }
    }

    /// Returns session IDs owned by this connection (for cleanup on disconnect).
    pub fn session_ids(&self) -> &[String] {
        &self.session_ids
    }

    /// Answer one request. Never fails: errors become RTSP error responses.
    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let Some(cseq) = request.cseq() else {
            tracing::warn!(method = %request.method, "request without CSeq");
            return RtspResponse::from_error(&RtspError::BadRequest("missing CSeq".to_string()));
        };

        let result = request.method().and_then(|method| match method {
            Method::Options => Ok(self.handle_options(cseq)),
            Method::Describe => self.handle_describe(cseq, &request.uri),
            Method::Setup => self.handle_setup(cseq, request),
            Method::Play => self.handle_play(cseq, request),
            Method::Pause => self.handle_pause(cseq, request),
            Method::Teardown => self.handle_teardown(cseq, request),
            Method::GetParameter => Ok(self.handle_get_parameter(cseq, request)),
        });

        match result {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    method = %request.method,
                    uri = %request.uri,
                    %cseq,
                    error = %e,
                    "request rejected"
                );
                RtspResponse::from_error(&e).add_header("CSeq", cseq)
            }
        }
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(%cseq, "OPTIONS");
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Public", &Method::public_list())
    }

    /// Parses host from an RTSP URI (e.g. rtsp://host:8554/path -> host). Falls back to client IP if invalid.
    fn host_from_uri_or_client(&self, uri: &str) -> String {
        if let Some(host) = &self.config.public_host {
            return host.clone();
        }

        if let Some(after_scheme) = uri
            .strip_prefix("rtsp://")
            .or_else(|| uri.strip_prefix("rtsps://"))
        {
            let host = after_scheme
                .split('/')
                .next()
                .and_then(|host_port| host_port.split(':').next())
                .unwrap_or("")
                .trim();
            if !host.is_empty() {
                return host.to_string();
            }
        }
        self.client_addr.ip().to_string()
    }

    fn handle_describe(&self, cseq: &str, uri: &str) -> Result<RtspResponse> {
        tracing::debug!(%cseq, uri, "DESCRIBE");

        let clip = self.catalog.resolve_from_uri(uri)?;
        let host = self.host_from_uri_or_client(uri);
        let sdp = sdp::generate_sdp(&clip, &host, &self.config);

        Ok(RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &format!("{}/", uri.trim_end_matches('/')))
            .with_body(sdp))
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> Result<RtspResponse> {
        // One stream per session: a SETUP inside an existing session is a
        // re-SETUP, which this server does not allow once READY.
        if let Some(id) = request.session_id() {
            let state = self.lookup(id)?.lock().state();
            return Err(RtspError::InvalidStateTransition {
                method: Method::Setup.as_str(),
                state,
            });
        }

        let clip = self.catalog.resolve_from_uri(&request.uri)?;

        let transport = request
            .get_header("Transport")
            .ok_or_else(|| RtspError::BadRequest("SETUP without Transport header".to_string()))
            .and_then(TransportHeader::parse)?;

        let destination = SocketAddr::new(self.client_addr.ip(), transport.client_rtp_port);
        let socket = RtpSocket::bind(self.rtp_bind_ip(destination))?;
        let server_port = socket.local_port()?;

        let format = clip.format().clone();
        let packetizer = FramePacketizer::random(&format, self.config.max_payload);
        packetizer.validate()?;
        let ssrc = packetizer.ssrc();

        let stream = Stream::new(
            Box::new(clip.cursor()),
            packetizer,
            socket,
            destination,
            format,
            self.config.end_of_stream,
        );

        let timeout = self.config.session_timeout_secs;
        let session = self
            .registry
            .create(|id| Session::new(id, clip.name(), server_port, stream, timeout));
        let (session_id, session_header) = {
            let session = session.lock();
            (session.id().to_string(), session.session_header_value())
        };
        self.session_ids.push(session_id.clone());

        tracing::info!(
            session_id,
            clip = clip.name(),
            client_rtp = %destination,
            server_rtp_port = server_port,
            ssrc = %format!("{ssrc:08X}"),
            "session created via SETUP"
        );

        Ok(RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &transport.response_value(server_port, ssrc))
            .add_header("Session", &session_header))
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> Result<RtspResponse> {
        let handle = self.session_for(request, Method::Play)?;
        let mut session = handle.lock();
        let rtp_info = session.play()?;

        tracing::info!(session_id = session.id(), "session started playing");

        let mut resp = RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session.session_header_value())
            .add_header("Range", "npt=0.000-");

        if let Some(info) = rtp_info {
            resp = resp.add_header(
                "RTP-Info",
                &format!(
                    "url={};seq={};rtptime={}",
                    request.uri, info.sequence, info.rtptime
                ),
            );
        }

        Ok(resp)
    }

    fn handle_pause(&mut self, cseq: &str, request: &RtspRequest) -> Result<RtspResponse> {
        let handle = self.session_for(request, Method::Pause)?;
        let mut session = handle.lock();
        session.pause()?;

        tracing::info!(session_id = session.id(), "session paused");

        Ok(RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session.session_header_value()))
    }

    fn handle_teardown(&mut self, cseq: &str, request: &RtspRequest) -> Result<RtspResponse> {
        let handle = self.session_for(request, Method::Teardown)?;
        let session_id = {
            let mut session = handle.lock();
            session.teardown()?;
            session.id().to_string()
        };

        self.registry.remove(&session_id);
        self.session_ids.retain(|id| id != &session_id);
        tracing::info!(session_id, "session terminated via TEARDOWN");

        Ok(RtspResponse::ok().add_header("CSeq", cseq))
    }

    /// GET_PARAMETER is used by clients (e.g. VLC) as a keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        tracing::trace!(%cseq, "GET_PARAMETER keepalive");

        let mut resp = RtspResponse::ok().add_header("CSeq", cseq);

        if let Some(id) = request.session_id()
            && let Some(session) = self.registry.get(id)
        {
            resp = resp.add_header("Session", &session.lock().session_header_value());
        }

        resp
    }

    /// Session named by the request's `Session` header.
    ///
    /// No header means the client never got past INIT, so the method is
    /// not valid in this state (455); an unknown ID is 454.
    fn session_for(&self, request: &RtspRequest, method: Method) -> Result<SessionHandle> {
        match request.session_id() {
            Some(id) => self.lookup(id),
            None => Err(RtspError::InvalidStateTransition {
                method: method.as_str(),
                state: SessionState::Init,
            }),
        }
    }

    fn lookup(&self, id: &str) -> Result<SessionHandle> {
        self.registry
            .get(id)
            .ok_or_else(|| RtspError::UnknownSession(id.to_string()))
    }

    /// A v4 wildcard cannot reach a v6 client; switch to the v6 wildcard.
    fn rtp_bind_ip(&self, destination: SocketAddr) -> IpAddr {
        match (self.config.rtp_bind_ip, destination.ip()) {
            (IpAddr::V4(ip), IpAddr::V6(_)) if ip.is_unspecified() => {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            }
            (ip, _) => ip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rtp::RtpPacket;
    use crate::media::{Clip, MediaFormat};
    use std::net::{Ipv4Addr, UdpSocket};
    use std::time::Duration;

    struct Fixture {
        handler: MethodHandler,
        registry: SessionRegistry,
        rtp_rx: UdpSocket,
    }

    fn fixture() -> Fixture {
        let catalog = MediaCatalog::new();
        catalog.insert(
            Clip::new("clip.bin", MediaFormat::mjpeg(50), vec![vec![0xAB; 3000]; 20]).unwrap(),
        );

        let rtp_rx = UdpSocket::bind("127.0.0.1:0").unwrap();
        rtp_rx
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();

        let config = ServerConfig {
            rtp_bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..ServerConfig::default()
        };
        let registry = SessionRegistry::new();
        let handler = MethodHandler::new(
            registry.clone(),
            SocketAddr::from(([127, 0, 0, 1], 40000)),
            catalog,
            Arc::new(config),
        );
        Fixture {
            handler,
            registry,
            rtp_rx,
        }
    }

    fn request(raw: &str) -> RtspRequest {
        RtspRequest::parse(raw).unwrap()
    }

    impl Fixture {
        fn send(&mut self, raw: &str) -> RtspResponse {
            self.handler.handle(&request(raw))
        }

        fn setup(&mut self) -> String {
            let port = self.rtp_rx.local_addr().unwrap().port();
            let resp = self.send(&format!(
                "SETUP rtsp://127.0.0.1/clip.bin/track1 RTSP/1.0\r\nCSeq: 3\r\n\
                 Transport: RTP/AVP;unicast;client_port={}-{}\r\n\r\n",
                port,
                port + 1
            ));
            assert_eq!(resp.status_code, 200);
            resp.get_header("Session")
                .unwrap()
                .split(';')
                .next()
                .unwrap()
                .to_string()
        }

        fn with_session(&mut self, method: &str, cseq: u32, id: &str) -> RtspResponse {
            self.send(&format!(
                "{method} rtsp://127.0.0.1/clip.bin RTSP/1.0\r\nCSeq: {cseq}\r\nSession: {id}\r\n\r\n"
            ))
        }
    }

    #[test]
    fn missing_cseq_is_bad_request() {
        let mut f = fixture();
        let resp = f.send("OPTIONS rtsp://127.0.0.1/clip.bin RTSP/1.0\r\n\r\n");
        assert_eq!(resp.status_code, 400);
    }

    #[test]
    fn options_lists_methods_and_echoes_cseq() {
        let mut f = fixture();
        let resp = f.send("OPTIONS * RTSP/1.0\r\nCSeq: 17\r\n\r\n");
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.get_header("CSeq"), Some("17"));
        assert!(resp.get_header("Public").unwrap().contains("TEARDOWN"));
    }

    #[test]
    fn unknown_method_is_not_implemented() {
        let mut f = fixture();
        let resp = f.send("RECORD rtsp://127.0.0.1/clip.bin RTSP/1.0\r\nCSeq: 2\r\n\r\n");
        assert_eq!(resp.status_code, 501);
        assert_eq!(resp.get_header("CSeq"), Some("2"));
    }

    #[test]
    fn describe_known_and_unknown() {
        let mut f = fixture();
        let resp = f.send("DESCRIBE rtsp://127.0.0.1/clip.bin RTSP/1.0\r\nCSeq: 2\r\n\r\n");
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.get_header("Content-Type"), Some("application/sdp"));
        assert!(resp.body.as_ref().unwrap().contains("m=video 0 RTP/AVP 26"));

        let resp = f.send("DESCRIBE rtsp://127.0.0.1/nope.bin RTSP/1.0\r\nCSeq: 3\r\n\r\n");
        assert_eq!(resp.status_code, 404);
    }

    #[test]
    fn setup_reports_real_server_port_and_session() {
        let mut f = fixture();
        let port = f.rtp_rx.local_addr().unwrap().port();
        let resp = f.send(&format!(
            "SETUP rtsp://127.0.0.1/clip.bin/track1 RTSP/1.0\r\nCSeq: 3\r\n\
             Transport: RTP/AVP;unicast;client_port={port}\r\n\r\n"
        ));
        assert_eq!(resp.status_code, 200);

        let transport = resp.get_header("Transport").unwrap();
        assert!(transport.contains(&format!("client_port={}-{}", port, port + 1)));
        assert!(transport.contains(";ssrc="));
        assert!(!transport.contains("server_port=0-"));

        let session = resp.get_header("Session").unwrap();
        assert!(session.ends_with(";timeout=60"));
        assert_eq!(session.split(';').next().unwrap().len(), 16);

        assert_eq!(f.registry.len(), 1);
        assert_eq!(f.handler.session_ids().len(), 1);
    }

    #[test]
    fn setup_errors() {
        let mut f = fixture();

        let resp = f.send(
            "SETUP rtsp://127.0.0.1/missing.bin RTSP/1.0\r\nCSeq: 1\r\n\
             Transport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n",
        );
        assert_eq!(resp.status_code, 404);

        let resp = f.send(
            "SETUP rtsp://127.0.0.1/clip.bin RTSP/1.0\r\nCSeq: 2\r\n\
             Transport: RTP/AVP/TCP;unicast;interleaved=0-1\r\n\r\n",
        );
        assert_eq!(resp.status_code, 461);

        let resp = f.send("SETUP rtsp://127.0.0.1/clip.bin RTSP/1.0\r\nCSeq: 3\r\n\r\n");
        assert_eq!(resp.status_code, 400);

        assert!(f.registry.is_empty());

        let id = f.setup();
        let resp = f.send(&format!(
            "SETUP rtsp://127.0.0.1/clip.bin RTSP/1.0\r\nCSeq: 5\r\nSession: {id}\r\n\
             Transport: RTP/AVP;unicast;client_port=5000-5001\r\n\r\n"
        ));
        assert_eq!(resp.status_code, 455);
        assert_eq!(f.registry.len(), 1);
    }

    #[test]
    fn play_without_or_with_unknown_session() {
        let mut f = fixture();
        let resp = f.send("PLAY rtsp://127.0.0.1/clip.bin RTSP/1.0\r\nCSeq: 4\r\n\r\n");
        assert_eq!(resp.status_code, 455);

        let resp = f.with_session("PLAY", 5, "0000000000000000");
        assert_eq!(resp.status_code, 454);
        assert_eq!(resp.get_header("CSeq"), Some("5"));
    }

    #[test]
    fn play_pause_teardown_cycle() {
        let mut f = fixture();
        let id = f.setup();

        let resp = f.with_session("PLAY", 4, &id);
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.get_header("Range"), Some("npt=0.000-"));
        let rtp_info = resp.get_header("RTP-Info").unwrap();
        let seq: u16 = rtp_info
            .split(';')
            .find_map(|p| p.strip_prefix("seq="))
            .unwrap()
            .parse()
            .unwrap();

        // 3000-byte frames at 1400 bytes per packet: 3 fragments each.
        let mut buf = [0u8; 2048];
        let n = f.rtp_rx.recv(&mut buf).unwrap();
        let first = RtpPacket::parse(&buf[..n]).unwrap();
        assert_eq!(first.sequence, seq);
        assert_eq!(first.payload_type, 26);
        assert!(!first.marker);

        let resp = f.with_session("PAUSE", 5, &id);
        assert_eq!(resp.status_code, 200);
        let resp = f.with_session("PAUSE", 6, &id);
        assert_eq!(resp.status_code, 455);

        let resp = f.with_session("TEARDOWN", 7, &id);
        assert_eq!(resp.status_code, 200);
        assert!(f.registry.is_empty());
        assert!(f.handler.session_ids().is_empty());

        let resp = f.with_session("PLAY", 8, &id);
        assert_eq!(resp.status_code, 454);
    }

    #[test]
    fn get_parameter_echoes_known_session() {
        let mut f = fixture();
        let id = f.setup();
        let resp = f.with_session("GET_PARAMETER", 9, &id);
        assert_eq!(resp.status_code, 200);
        assert!(resp.get_header("Session").unwrap().starts_with(&id));

        let resp = f.with_session("GET_PARAMETER", 10, "FFFFFFFFFFFFFFFF");
        assert_eq!(resp.status_code, 200);
        assert!(resp.get_header("Session").is_none());
    }
}
