//! RTSP server for pre-recorded clips.
//!
//! Clients negotiate a session over RTSP/1.0 (TCP) and receive the clip's
//! frames as RTP over UDP, paced at the clip's frame rate. Each PLAYING
//! session runs its own send loop; PAUSE and TEARDOWN stop it before they
//! are answered.
//!
//! ```no_run
//! use std::path::Path;
//! use vod::{MediaCatalog, MediaFormat, Server};
//!
//! let catalog = MediaCatalog::new();
//! catalog.load_dir(Path::new("videos"), &MediaFormat::mjpeg(25))?;
//!
//! let mut server = Server::new("0.0.0.0:8554", catalog);
//! server.start()?;
//! # server.stop();
//! # Ok::<(), vod::RtspError>(())
//! ```

pub mod catalog;
pub mod error;
pub mod media;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use catalog::MediaCatalog;
pub use error::{Result, RtspError};
pub use media::{Clip, Frame, FrameSource, MediaFormat};
pub use server::{Server, ServerConfig};
pub use session::{EndOfStream, SessionState};
