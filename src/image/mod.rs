//! Turning an image location into a ready filesystem root


mod path;

pub use path::PathKind;

use crate::{
    errors::ImageError,
    filesystem::tar,
    remote::{random_name, Fetcher, FRESH_NAME_ATTEMPTS},
};
use std::{
    env, fs, io, iter,
    path::{Path, PathBuf},
};
use tokio::task;

const DOWNLOAD_DIR_PREFIX: &str = "rootbox-";

/// Where an image comes from, and where it should end up
///
/// `location` is a local directory, a local tar file, or an `http`/`https`
/// URL of a tar file. `root` is where archives get extracted; it's ignored
/// for directory images, which are used in place.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageSource {
    location: String,
    root: PathBuf,
}

impl ImageSource {
    pub fn new<L: Into<String>, P: Into<PathBuf>>(location: L, root: P) -> Self {
        ImageSource {
            location: location.into(),
            root: root.into(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Builder for configuring custom [Preparer] instances
#[derive(Debug, Default)]
pub struct PreparerBuilder {
    fetcher: Option<Fetcher>,
    download_dir: Option<PathBuf>,
    cleanup_on_failure: bool,
}

impl PreparerBuilder {
    /// Start constructing a custom preparer
    pub fn new() -> Self {
        Default::default()
    }

    /// Use this fetcher for remote images
    pub fn fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Change the directory that remote images are downloaded under
    ///
    /// Every download gets its own fresh subdirectory here. The default can be
    /// determined with [Preparer::default_download_dir()]
    pub fn download_dir(mut self, dir: &Path) -> Self {
        self.download_dir = Some(dir.to_path_buf());
        self
    }

    /// Remove what a failed preparation left behind
    ///
    /// When enabled, a failure after downloading removes the download
    /// directory, and a failure after creating the root removes the root.
    /// Roots that already existed are left alone. By default nothing is
    /// cleaned up.
    pub fn cleanup_on_failure(mut self, enabled: bool) -> Self {
        self.cleanup_on_failure = enabled;
        self
    }

    /// Construct a Preparer using the parameters from this Builder
    pub fn build(self) -> Result<Preparer, ImageError> {
        let download_dir = match self.download_dir {
            Some(dir) => dir,
            None => Preparer::default_download_dir(),
        };
        log::debug!("using download directory {:?}", download_dir);
        Ok(Preparer {
            fetcher: match self.fetcher {
                Some(fetcher) => fetcher,
                None => Fetcher::new()?,
            },
            download_dir,
            cleanup_on_failure: self.cleanup_on_failure,
        })
    }
}

/// Prepares filesystem roots from images
///
/// Directories are used as they are. Local archives are extracted into the
/// requested root, and remote archives are first downloaded into a fresh
/// directory under the download directory, which is not removed afterward.
#[derive(Clone, Debug)]
pub struct Preparer {
    fetcher: Fetcher,
    download_dir: PathBuf,
    cleanup_on_failure: bool,
}

/// Things created so far by one preparation, for optional cleanup
#[derive(Default)]
struct Created {
    download_dir: Option<PathBuf>,
    root: Option<PathBuf>,
}

impl Created {
    fn remove(self) {
        for dir in self.root.iter().chain(self.download_dir.iter()) {
            match fs::remove_dir_all(dir) {
                Ok(()) => log::debug!("cleaned up {:?}", dir),
                Err(err) => log::warn!("unable to clean up {:?}, {}", dir, err),
            }
        }
    }
}

impl Preparer {
    /// Construct a new preparer with default options
    pub fn new() -> Result<Preparer, ImageError> {
        Preparer::builder().build()
    }

    /// Construct a preparer with custom options, via PreparerBuilder
    pub fn builder() -> PreparerBuilder {
        PreparerBuilder::new()
    }

    /// Determine the download directory used if no other is specified
    ///
    /// This is `$ROOTBOX_DOWNLOAD_DIR` if set, otherwise the system's
    /// temporary directory.
    pub fn default_download_dir() -> PathBuf {
        match env::var_os("ROOTBOX_DOWNLOAD_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => env::temp_dir(),
        }
    }

    /// Prepare an image, returning the directory that now holds its
    /// filesystem
    ///
    /// That's the image location itself for directory images, or the root
    /// for archives. Any failure ends the preparation right away.
    pub async fn prepare(&self, source: &ImageSource) -> Result<PathBuf, ImageError> {
        let mut created = Created::default();
        let result = self.prepare_tracked(source, &mut created).await;
        if result.is_err() && self.cleanup_on_failure {
            created.remove();
        }
        result
    }

    async fn prepare_tracked(
        &self,
        source: &ImageSource,
        created: &mut Created,
    ) -> Result<PathBuf, ImageError> {
        let location = source.location();
        let root = source.root();
        let kind = PathKind::classify(location)?;
        match kind {
            PathKind::Directory => return use_directory(location, root),
            PathKind::Unknown => {
                return Err(ImageError::PathClassification {
                    path: location.to_string(),
                    source: io::ErrorKind::NotFound.into(),
                })
            }
            PathKind::File | PathKind::Remote => (),
        }
        if root.as_os_str().is_empty() {
            return Err(ImageError::RootRequired);
        }

        let archive = if kind == PathKind::Remote {
            let dir = self.fresh_download_dir().await?;
            created.download_dir = Some(dir.clone());
            self.fetcher.download(location, &dir).await?
        } else {
            PathBuf::from(location)
        };

        if !root.exists() {
            tokio::fs::create_dir_all(root).await?;
            created.root = Some(root.to_path_buf());
        }

        let target = root.to_path_buf();
        task::spawn_blocking(move || tar::extract_file(&archive, &target)).await??;
        log::info!("prepared {:?} from {:?}", root, location);
        Ok(root.to_path_buf())
    }

    async fn fresh_download_dir(&self) -> Result<PathBuf, ImageError> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let names =
            iter::repeat_with(|| random_name(DOWNLOAD_DIR_PREFIX)).take(FRESH_NAME_ATTEMPTS);
        create_first_new_dir(&self.download_dir, names).await
    }
}

/// Create the first of `names` under `parent` that doesn't exist yet
async fn create_first_new_dir<I>(parent: &Path, names: I) -> Result<PathBuf, ImageError>
where
    I: IntoIterator<Item = String>,
{
    let mut last_err = io::Error::from(io::ErrorKind::AlreadyExists);
    for name in names {
        let dir = parent.join(name);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => return Ok(dir),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_err = e,
            Err(source) => return Err(ImageError::DownloadStorage { path: dir, source }),
        }
    }
    Err(ImageError::DownloadStorage {
        path: parent.to_path_buf(),
        source: last_err,
    })
}

/// Directory images are their own root
///
/// A non-empty root has to name the same directory.
fn use_directory(location: &str, root: &Path) -> Result<PathBuf, ImageError> {
    let image = PathBuf::from(location);
    if !root.as_os_str().is_empty() && !same_directory(&image, root) {
        return Err(ImageError::ConflictingRoot {
            image,
            root: root.to_path_buf(),
        });
    }
    log::info!("using directory {:?} as root", image);
    Ok(image)
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Prepare an image with default settings
///
/// Equivalent to [Preparer::new()] followed by [Preparer::prepare()].
pub async fn prepare_image<P: AsRef<Path>>(location: &str, root: P) -> Result<PathBuf, ImageError> {
    Preparer::new()?
        .prepare(&ImageSource::new(location, root.as_ref()))
        .await
}
