use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, RtspError};
use crate::media::{Clip, MediaFormat};

/// Registry of streamable clips, keyed by resource name.
///
/// Clips are immutable once inserted; sessions hold an `Arc<Clip>` and
/// read it through their own cursor, so one clip serves any number of
/// concurrent viewers.
#[derive(Clone, Default)]
pub struct MediaCatalog {
    clips: Arc<RwLock<HashMap<String, Arc<Clip>>>>,
}

impl MediaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a clip under its own name. Replaces any clip with the same name.
    pub fn insert(&self, clip: Clip) -> Arc<Clip> {
        let clip = Arc::new(clip);
        self.clips
            .write()
            .insert(clip.name().to_string(), clip.clone());
        tracing::info!(
            name = clip.name(),
            frames = clip.frame_count(),
            "clip registered"
        );
        clip
    }

    /// Load every regular file in `dir` as a clip.
    ///
    /// Files that fail to parse are skipped with a warning; a directory
    /// that cannot be read at all is an error. Returns the number of
    /// clips registered.
    pub fn load_dir(&self, dir: &Path, format: &MediaFormat) -> Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match Clip::open(&path, format.clone()) {
                Ok(clip) => {
                    self.insert(clip);
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping clip");
                }
            }
        }
        tracing::info!(dir = %dir.display(), loaded, "media directory scanned");
        Ok(loaded)
    }

    /// Look up a clip by exact resource name.
    pub fn get(&self, name: &str) -> Option<Arc<Clip>> {
        self.clips.read().get(name).cloned()
    }

    /// Resolve the clip an RTSP URI refers to.
    pub fn resolve_from_uri(&self, uri: &str) -> Result<Arc<Clip>> {
        let name = resource_name_from_uri(uri);
        self.get(name)
            .ok_or_else(|| RtspError::UnknownResource(name.to_string()))
    }

    /// Registered resource names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clips.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clips.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.read().is_empty()
    }
}

/// Extract the resource name from an RTSP URI.
///
/// `rtsp://host:8554/clip.bin`               → `clip.bin`
/// `rtsp://host:8554/clip.bin/track1`        → `clip.bin`
/// `rtsp://host:8554/clip.bin/trackID=0`     → `clip.bin`
/// `rtsp://host:8554/videos/movie.mjpeg`     → `videos/movie.mjpeg`
/// `/clip.bin`                               → `clip.bin`
/// `rtsp://host:8554`                        → `` (matches nothing)
pub fn resource_name_from_uri(uri: &str) -> &str {
    let path = if let Some(after) = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => "",
        }
    } else {
        uri
    };

    // Query strings never name a resource.
    let path = path.split('?').next().unwrap_or(path);
    let path = path.trim_matches('/');

    // Strip track control suffix: clip.bin/track1 → clip.bin
    match path.rfind("/track") {
        Some(pos) => &path[..pos],
        None => path,
    }
}
