use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use vod::media::packetizer::DEFAULT_MAX_PAYLOAD;
use vod::{EndOfStream, MediaCatalog, MediaFormat, Server, ServerConfig};

#[derive(Parser)]
#[command(
    name = "rtsp-vod-server",
    about = "RTSP server streaming pre-recorded clips over RTP/UDP"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Directory of clips; each file is served under its file name
    #[arg(long, short, default_value = "videos")]
    media_dir: PathBuf,

    /// Nominal frame rate of the clips
    #[arg(long, default_value_t = 25, value_parser = clap::value_parser!(u32).range(1..=1000))]
    fps: u32,

    /// RTP payload type advertised and sent
    #[arg(long, default_value_t = vod::media::JPEG_PAYLOAD_TYPE)]
    payload_type: u8,

    /// Largest RTP payload per datagram, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_PAYLOAD)]
    max_payload: usize,

    /// Stop at the end of a clip instead of looping
    #[arg(long)]
    no_loop: bool,

    /// Host advertised in SDP (defaults to the host in the request URI)
    #[arg(long)]
    public_host: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let format = MediaFormat::mjpeg(args.fps).with_payload_type(args.payload_type);
    let catalog = MediaCatalog::new();
    match catalog.load_dir(&args.media_dir, &format) {
        Ok(0) => tracing::warn!(dir = %args.media_dir.display(), "no clips found"),
        Ok(_) => {}
        Err(e) => {
            tracing::error!(dir = %args.media_dir.display(), error = %e, "cannot read media directory");
            return ExitCode::FAILURE;
        }
    }

    let config = ServerConfig {
        public_host: args.public_host,
        max_payload: args.max_payload,
        end_of_stream: if args.no_loop {
            EndOfStream::Stop
        } else {
            EndOfStream::Loop
        },
        ..ServerConfig::default()
    };

    let mut server = Server::with_config(&args.bind, catalog, config);

    if let Err(e) = server.start() {
        tracing::error!(bind = %args.bind, error = %e, "failed to start server");
        return ExitCode::FAILURE;
    }

    for name in server.catalog().names() {
        tracing::info!("serving rtsp://{}/{}", args.bind, name);
    }

    println!("RTSP server on {}, press Enter to stop", args.bind);
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        tracing::warn!(error = %e, "stdin closed");
    }

    server.stop();
    ExitCode::SUCCESS
}
