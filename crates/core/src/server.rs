use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::catalog::MediaCatalog;
use crate::error::{Result, RtspError};
use crate::media::packetizer::DEFAULT_MAX_PAYLOAD;
use crate::session::{DEFAULT_SESSION_TIMEOUT_SECS, EndOfStream, SessionRegistry};
use crate::transport::tcp;

/// Server-level configuration used by protocol handlers and send loops.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public host advertised in SDP `o=` and `c=` lines.
    /// When `None`, host is inferred from request URI/client address.
    pub public_host: Option<String>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
    /// Largest RTP payload per datagram, header excluded.
    pub max_payload: usize,
    /// What a send loop does when its clip runs out.
    pub end_of_stream: EndOfStream,
    /// Timeout advertised in the `Session` header.
    pub session_timeout_secs: u64,
    /// Local address per-session RTP sockets bind to.
    pub rtp_bind_ip: IpAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_host: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "Clip".to_string(),
            max_payload: DEFAULT_MAX_PAYLOAD,
            end_of_stream: EndOfStream::Loop,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            rtp_bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

/// RTSP server for the clips in a [`MediaCatalog`].
///
/// Owns the session registry and the accept thread. Delegates TCP
/// connection handling to [`transport::tcp`](crate::transport::tcp);
/// each PLAYING session runs its own send loop.
pub struct Server {
    registry: SessionRegistry,
    catalog: MediaCatalog,
    running: Arc<AtomicBool>,
    bind_addr: String,
    local_addr: Option<SocketAddr>,
    accept_thread: Option<JoinHandle<()>>,
    config: Arc<ServerConfig>,
}

impl Server {
    pub fn new(bind_addr: &str, catalog: MediaCatalog) -> Self {
        Self::with_config(bind_addr, catalog, ServerConfig::default())
    }

    /// Create a server with custom protocol/SDP/streaming configuration.
    pub fn with_config(bind_addr: &str, catalog: MediaCatalog, config: ServerConfig) -> Self {
        Self {
            registry: SessionRegistry::new(),
            catalog,
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            local_addr: None,
            accept_thread: None,
            config: Arc::new(config),
        }
    }

    /// Bind the RTSP listener and start accepting connections.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        self.running.store(true, Ordering::SeqCst);
        self.local_addr = Some(local_addr);

        let running = self.running.clone();
        let registry = self.registry.clone();
        let catalog = self.catalog.clone();
        let config = self.config.clone();

        tracing::info!(
            addr = %local_addr,
            clips = self.catalog.len(),
            "RTSP server listening"
        );

        self.accept_thread = Some(thread::spawn(move || {
            tcp::accept_loop(listener, registry, catalog, config, running);
        }));

        Ok(())
    }

    /// Stop accepting connections and tear down every session.
    ///
    /// Returns once all send loops have exited.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("server stopping");

        if let Some(handle) = self.accept_thread.take()
            && handle.join().is_err()
        {
            tracing::error!("accept thread panicked");
        }

        let stopped = self.registry.shutdown();
        tracing::info!(sessions = stopped, "server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the listener is bound to. Resolves port 0 to the real port.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.local_addr.ok_or(RtspError::NotStarted)
    }

    /// Number of sessions currently registered.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn catalog(&self) -> &MediaCatalog {
        &self.catalog
    }

    /// Returns the server's protocol configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
