use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::catalog::MediaCatalog;
use crate::error::{ParseErrorKind, RtspError};
use crate::protocol::{MethodHandler, RtspRequest, RtspResponse};
use crate::server::ServerConfig;
use crate::session::SessionRegistry;

/// How long a blocked read waits before re-checking the `running` flag.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound for a request head or body. Larger requests get 400 and the
/// connection is closed.
const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(
    listener: TcpListener,
    registry: SessionRegistry,
    catalog: MediaCatalog,
    config: Arc<ServerConfig>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let registry = registry.clone();
                let catalog = catalog.clone();
                let config = config.clone();
                let running = running.clone();
                thread::spawn(move || {
                    Connection::handle(stream, registry, catalog, config, running);
                });
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    handler: MethodHandler,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    fn handle(
        stream: TcpStream,
        registry: SessionRegistry,
        catalog: MediaCatalog,
        config: Arc<ServerConfig>,
        running: Arc<AtomicBool>,
    ) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        if let Err(e) = stream.set_read_timeout(Some(READ_POLL_INTERVAL)) {
            tracing::warn!(%peer_addr, error = %e, "cannot set read timeout");
            return;
        }

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };

        tracing::info!(%peer_addr, "client connected");

        let handler = MethodHandler::new(registry.clone(), peer_addr, catalog, config);

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer: stream,
            handler,
            peer_addr,
        };

        let reason = conn.run(&running);
        conn.cleanup(&registry);

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    ///
    /// Requests are processed strictly in arrival order; the next one is
    /// not read until the previous response has been written. Every read is
    /// bounded by what is left of [`MAX_REQUEST_BYTES`], so a peer that never
    /// sends a newline cannot grow the buffer past it.
    fn run(&mut self, running: &AtomicBool) -> &'static str {
        let mut head: Vec<u8> = Vec::new();
        let mut line: Vec<u8> = Vec::new();

        while running.load(Ordering::SeqCst) {
            let used = head.len() + line.len();
            if used > MAX_REQUEST_BYTES {
                self.respond(RtspResponse::from_error(&RtspError::BadRequest(
                    "request head too large".to_string(),
                )));
                return "request too large";
            }
            let remaining = (MAX_REQUEST_BYTES + 1 - used) as u64;

            // A timed-out read keeps the partial line in `line`.
            match (&mut self.reader)
                .take(remaining)
                .read_until(b'\n', &mut line)
            {
                Ok(0) => return "connection closed by client",
                Ok(_) => {}
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    continue;
                }
                Err(_) => return "read error",
            }

            if line.last() != Some(&b'\n') {
                // Read limit hit mid-line, or EOF; the next pass decides.
                continue;
            }

            let blank = line == b"\r\n" || line == b"\n";
            if blank && head.is_empty() {
                // Stray separator between requests.
                line.clear();
                continue;
            }

            head.append(&mut line);

            if blank {
                let raw = std::mem::take(&mut head);
                if let Err(reason) = self.process(raw, running) {
                    return reason;
                }
            }
        }

        "server shutting down"
    }

    /// Decode one request head, read its body, answer it.
    fn process(&mut self, raw: Vec<u8>, running: &AtomicBool) -> Result<(), &'static str> {
        let head = match String::from_utf8(raw) {
            Ok(head) => head,
            Err(e) => return self.reject_undecodable(e.as_bytes(), running),
        };

        let mut request = match RtspRequest::parse(&head) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                let mut response = RtspResponse::from_error(&e);
                if let Some(cseq) = scan_header(&head, "CSeq") {
                    response = response.add_header("CSeq", cseq);
                }
                return self.write(response);
            }
        };

        // `parse` already rejected a non-numeric Content-Length.
        let length = request.content_length().unwrap_or(0);
        if length > MAX_REQUEST_BYTES {
            self.respond(RtspResponse::from_error(&RtspError::BadRequest(
                "request body too large".to_string(),
            )));
            return Err("request too large");
        }
        if length > 0 {
            let body = self.read_body(length, running)?;
            request.body = Some(String::from_utf8_lossy(&body).into_owned());
        }

        tracing::debug!(
            peer = %self.peer_addr,
            method = %request.method,
            uri = %request.uri,
            cseq = request.cseq().unwrap_or("-"),
            "request"
        );

        let response = self.handler.handle(&request);

        tracing::debug!(
            peer = %self.peer_addr,
            status = response.status_code,
            "response"
        );

        self.write(response)
    }

    /// Answer a head that is not UTF-8 with 400 and skip its body, if it
    /// announced one, so the next request is framed correctly.
    fn reject_undecodable(&mut self, raw: &[u8], running: &AtomicBool) -> Result<(), &'static str> {
        let head = String::from_utf8_lossy(raw);
        let error = RtspError::Parse {
            kind: ParseErrorKind::InvalidEncoding,
        };
        tracing::warn!(peer = %self.peer_addr, error = %error, "parse error");

        let length = scan_header(&head, "Content-Length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        if length > MAX_REQUEST_BYTES {
            self.respond(RtspResponse::from_error(&RtspError::BadRequest(
                "request body too large".to_string(),
            )));
            return Err("request too large");
        }
        if length > 0 {
            self.read_body(length, running)?;
        }

        let mut response = RtspResponse::from_error(&error);
        if let Some(cseq) = scan_header(&head, "CSeq") {
            response = response.add_header("CSeq", cseq);
        }
        self.write(response)
    }

    /// Read exactly `length` body bytes, tolerating read timeouts.
    fn read_body(&mut self, length: usize, running: &AtomicBool) -> Result<Vec<u8>, &'static str> {
        let mut body = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            if !running.load(Ordering::SeqCst) {
                return Err("server shutting down");
            }
            match self.reader.read(&mut body[filled..]) {
                Ok(0) => return Err("connection closed by client"),
                Ok(n) => filled += n,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => return Err("read error"),
            }
        }
        Ok(body)
    }

    fn write(&mut self, response: RtspResponse) -> Result<(), &'static str> {
        self.writer
            .write_all(response.serialize().as_bytes())
            .map_err(|_| "write error")
    }

    /// Best-effort reply before the connection is dropped.
    fn respond(&mut self, response: RtspResponse) {
        let _ = self.write(response);
    }

    /// Tear down the sessions this connection created.
    fn cleanup(&self, registry: &SessionRegistry) {
        let orphaned = self.handler.session_ids();
        if !orphaned.is_empty() {
            let removed = registry.remove_many(orphaned);
            tracing::info!(peer = %self.peer_addr, removed, "cleaned up sessions on disconnect");
        }
    }
}

/// Find a header in a request that failed to parse, so the error
/// response can still echo its CSeq.
fn scan_header<'a>(head: &'a str, header: &str) -> Option<&'a str> {
    head.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case(header)
            .then(|| value.trim())
    })
}
