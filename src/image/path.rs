use crate::errors::ImageError;
use std::fs;
use url::Url;

/// What kind of image source a path or URL refers to
///
/// This is never stored; it's recomputed from the filesystem each time it's
/// needed, so the answer only holds at the moment of the call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PathKind {
    Unknown,
    Remote,
    Directory,
    File,
}

impl PathKind {
    /// Classify an image location
    ///
    /// Anything that parses as an `http` or `https` URL is [PathKind::Remote]
    /// without looking at the local filesystem, even if a local file with the
    /// same name exists. Everything else must exist locally; directories are
    /// [PathKind::Directory] and any other entry is treated as a
    /// [PathKind::File].
    pub fn classify(path: &str) -> Result<PathKind, ImageError> {
        if let Ok(url) = Url::parse(path) {
            if url.scheme() == "http" || url.scheme() == "https" {
                return Ok(PathKind::Remote);
            }
        }
        match fs::metadata(path) {
            Err(source) => Err(ImageError::PathClassification {
                path: path.to_string(),
                source,
            }),
            Ok(metadata) if metadata.is_dir() => Ok(PathKind::Directory),
            Ok(_) => Ok(PathKind::File),
        }
    }

    /// Like [PathKind::classify()], but errors become [PathKind::Unknown]
    pub fn of(path: &str) -> PathKind {
        PathKind::classify(path).unwrap_or(PathKind::Unknown)
    }
}
