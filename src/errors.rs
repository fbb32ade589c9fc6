//! Error types you might see while preparing an image or running a sandbox

use std::{io, path::PathBuf};
use thiserror::Error;

/// Errors during image preparation
#[derive(Error, Debug)]
pub enum ImageError {
    /// image path does not exist or can't be inspected
    #[error("can't classify image path {path:?}: {source}")]
    PathClassification {
        path: String,
        #[source]
        source: io::Error,
    },

    /// archive is compressed or otherwise not a plain tar stream
    #[error("unsupported archive format: {0}, only uncompressed tar is supported")]
    UnsupportedFormat(&'static str),

    /// extraction target must exist before extracting
    #[error("extraction target directory is missing: {0:?}")]
    TargetMissing(PathBuf),

    /// reading or writing one archive entry failed
    #[error("archive extraction failed at {0:?}: {1}")]
    Extract(PathBuf, #[source] io::Error),

    /// archive entry would land outside the target directory
    #[error("archive entry escapes the target directory: {0:?}")]
    UnsafeEntryPath(PathBuf),

    /// invalid url
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// remote site answered with something other than 200 OK
    #[error("remote site returned status {0}")]
    RemoteStatus(reqwest::StatusCode),

    /// network request error
    #[error("network request error: {0}")]
    Download(#[from] reqwest::Error),

    /// failed to store a downloaded body
    #[error("failed to store download at {path:?}: {source}")]
    DownloadStorage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// directory images are used in place and can't be given another root
    #[error("image directory {image:?} can't be used with a different root {root:?}")]
    ConflictingRoot { image: PathBuf, root: PathBuf },

    /// archives and remote images need somewhere to be extracted
    #[error("a root directory is required for archive images")]
    RootRequired,

    /// storage io error
    #[error("storage io error: {0}")]
    Storage(#[from] io::Error),

    /// asynchronous task failed during image preparation
    #[error("asynchronous task failed during image preparation")]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Errors from the lifecycle of a sandboxed process
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// process is already running
    #[error("process is already running")]
    AlreadyRunning,

    /// process has already finished, and can't be started again
    #[error("process has already finished, and can't be started again")]
    AlreadyFinished,

    /// process has not been started
    #[error("process has not been started")]
    NotStarted,

    /// process is not running
    #[error("process is not running")]
    NotRunning,

    /// process has not finished
    #[error("process has not finished")]
    NotFinished,

    /// output is already attached to a started process
    #[error("output is already attached to a started process")]
    OutputInUse,

    /// failed to launch the sandboxed process
    #[error("failed to start sandboxed process: {0}")]
    Start(#[source] io::Error),

    /// signal delivery failed
    #[error("failed to deliver signal {signal}: {source}")]
    Signal {
        signal: libc::c_int,
        #[source]
        source: io::Error,
    },

    /// waiting on the process failed
    #[error("failed to wait for sandboxed process: {0}")]
    Wait(#[source] io::Error),

    /// io error
    #[error("io error: {0}")]
    IOError(#[from] io::Error),

    /// task join error
    #[error("task join error: {0}")]
    TaskJoinError(#[from] tokio::task::JoinError),

    /// argument string contained internal nul byte
    #[error("argument string contained internal nul byte")]
    NulStringError(#[from] std::ffi::NulError),

    /// image error
    #[error("image error: {0}")]
    ImageError(#[from] ImageError),
}
