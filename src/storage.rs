// SPDX-License-Identifier: MPL-2.0

//! Derived file paths for stills and recordings

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::constants::media;

/// What a capture file will contain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Still,
    Video,
}

/// Directory for captures of one kind
///
/// `capture_dir` overrides the platform pictures/videos directories.
pub fn capture_dir(kind: MediaKind, capture_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = capture_dir {
        return dir.to_path_buf();
    }
    let base = match kind {
        MediaKind::Still => dirs::picture_dir(),
        MediaKind::Video => dirs::video_dir(),
    };
    base.or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(media::CAPTURE_SUBDIR)
}

/// Timestamped path `<dir>/<yyyy-mm-dd-HH-MM-SS>.<ext>` for a new capture
///
/// Creates the directory. Appends a counter when the second already has a
/// file of that name.
pub fn capture_file(
    kind: MediaKind,
    extension: &str,
    capture_dir_override: Option<&Path>,
) -> std::io::Result<PathBuf> {
    let dir = capture_dir(kind, capture_dir_override);
    std::fs::create_dir_all(&dir)?;

    let stem = chrono::Local::now().format(media::FILE_NAME_FORMAT).to_string();
    let mut path = dir.join(format!("{}.{}", stem, extension));
    let mut counter = 1;
    while path.exists() {
        path = dir.join(format!("{}-{}.{}", stem, counter, extension));
        counter += 1;
    }

    debug!(path = %path.display(), ?kind, "Derived capture path");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_file_uses_override_and_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let path = capture_file(MediaKind::Still, "png", Some(tmp.path())).unwrap();
        assert_eq!(path.parent(), Some(tmp.path()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
    }

    #[test]
    fn test_capture_file_avoids_collisions() {
        let tmp = tempfile::tempdir().unwrap();
        let first = capture_file(MediaKind::Video, "mp4", Some(tmp.path())).unwrap();
        std::fs::write(&first, b"x").unwrap();
        let second = capture_file(MediaKind::Video, "mp4", Some(tmp.path())).unwrap();
        assert_ne!(first, second);
    }
}
