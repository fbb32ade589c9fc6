//! Run a command confined to a filesystem root prepared from an image
//!
//! An image is a local directory, a local uncompressed tar file, or an
//! `http`/`https` URL of one. [image::Preparer] turns it into a populated
//! root directory, and [Sandbox] runs a process with its filesystem root
//! changed to that directory.
//!
//! Confinement is limited to the filesystem root. There are no network,
//! PID, user, or resource limits here.

#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("rootbox only works on linux or android");

pub mod errors;
pub mod filesystem;
pub mod image;
pub mod remote;
pub mod sandbox;

pub use crate::{
    image::{prepare_image, ImageSource, PathKind, Preparer},
    sandbox::{ExitStatus, ProcessState, Sandbox},
};

use crate::errors::ImageError;
use std::path::Path;

/// Prepare an image with default settings, and get a [Sandbox] for its root
pub async fn prepare<P: AsRef<Path>>(location: &str, root: P) -> Result<Sandbox, ImageError> {
    Ok(Sandbox::new(prepare_image(location, root).await?))
}
