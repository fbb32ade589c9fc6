//! Support for downloading image archives over HTTP

use crate::errors::ImageError;
use http::header::HeaderValue;
use rand::{distributions::Alphanumeric, Rng};
use reqwest::{header::HeaderMap, redirect, StatusCode};
use std::{
    convert::TryInto,
    env, io,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};
use url::Url;

const PLACEHOLDER_PREFIX: &str = "rootbox-";
/// How many random names to try before giving up on finding an unused one
pub(crate) const FRESH_NAME_ATTEMPTS: usize = 16;

/// Builder for configuring custom [Fetcher] instances
#[derive(Debug)]
pub struct FetcherBuilder {
    req: reqwest::ClientBuilder,
}

impl FetcherBuilder {
    /// Start constructing a custom fetcher
    ///
    /// Redirects are never followed; a redirect response is reported like any
    /// other non-200 status.
    pub fn new() -> Self {
        let req = reqwest::Client::builder()
            .user_agent(Fetcher::default_user_agent())
            .redirect(redirect::Policy::none());
        FetcherBuilder { req }
    }

    /// Set a timeout for each network request
    ///
    /// This timeout applies from the beginning of a (GET) request until the
    /// last byte has been received. By default there is no timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.req = self.req.timeout(timeout);
        self
    }

    /// Set a timeout for only the initial connect phase of each network request
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.req = self.req.connect_timeout(timeout);
        self
    }

    /// Sets the `User-Agent` header used by this fetcher
    pub fn user_agent<V>(mut self, value: V) -> Self
    where
        V: TryInto<HeaderValue>,
        V::Error: Into<http::Error>,
    {
        self.req = self.req.user_agent(value);
        self
    }

    /// Set the default headers for every HTTP request
    pub fn default_request_headers(mut self, headers: HeaderMap) -> Self {
        self.req = self.req.default_headers(headers);
        self
    }

    /// Construct a Fetcher using the parameters from this Builder
    pub fn build(self) -> Result<Fetcher, ImageError> {
        Ok(Fetcher {
            req: self.req.build()?,
        })
    }
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        FetcherBuilder::new()
    }
}

/// Downloads one remote resource at a time into a local directory
///
/// The HTTP client is owned by the fetcher; pass one in with
/// [Fetcher::with_client()] to control proxies, TLS, or anything else the
/// builder doesn't cover.
#[derive(Clone, Debug)]
pub struct Fetcher {
    req: reqwest::Client,
}

impl Fetcher {
    /// Construct a new fetcher with default options
    pub fn new() -> Result<Fetcher, ImageError> {
        Fetcher::builder().build()
    }

    /// Construct a fetcher with custom options, via FetcherBuilder
    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::new()
    }

    /// Use an existing HTTP client as-is
    pub fn with_client(req: reqwest::Client) -> Fetcher {
        Fetcher { req }
    }

    /// Return the default `User-Agent` that we use if no other is set
    pub fn default_user_agent() -> HeaderValue {
        static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
        HeaderValue::from_static(USER_AGENT)
    }

    /// The file name a download of this URL will be stored under, if the URL
    /// has one
    pub fn file_name(url: &Url) -> Option<String> {
        url.path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    /// Download a resource into `target_dir`, returning the absolute path of
    /// the new file
    ///
    /// The file is named after the last segment of the URL path. URLs without
    /// one get a fresh `rootbox-XXXXXXXX` name that can't clobber an existing
    /// file. Anything but `200 OK` is an error, and nothing is written in that
    /// case. A partially written file is left behind if the transfer fails.
    pub async fn download(&self, url: &str, target_dir: &Path) -> Result<PathBuf, ImageError> {
        let url = Url::parse(url)?;
        let dest_name = Fetcher::file_name(&url);

        log::info!("<{}> downloading...", url);
        let mut response = self.req.get(url.clone()).send().await?;
        if response.status() != StatusCode::OK {
            log::warn!("<{}> remote site returned {}", url, response.status());
            return Err(ImageError::RemoteStatus(response.status()));
        }

        let (path, mut file) = match dest_name {
            Some(name) => {
                let path = target_dir.join(name);
                let file = File::create(&path).await.map_err(|source| {
                    ImageError::DownloadStorage {
                        path: path.clone(),
                        source,
                    }
                })?;
                (path, file)
            }
            None => create_placeholder(target_dir).await?,
        };

        let mut total: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk)
                .await
                .map_err(|source| ImageError::DownloadStorage {
                    path: path.clone(),
                    source,
                })?;
            total += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|source| ImageError::DownloadStorage {
                path: path.clone(),
                source,
            })?;

        log::info!("<{}> read {} bytes to {:?}", url, total, path);
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(env::current_dir()?.join(path))
        }
    }
}

async fn create_placeholder(dir: &Path) -> Result<(PathBuf, File), ImageError> {
    let mut last_err = io::Error::from(io::ErrorKind::AlreadyExists);
    for _ in 0..FRESH_NAME_ATTEMPTS {
        let path = dir.join(random_name(PLACEHOLDER_PREFIX));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_err = e,
            Err(source) => return Err(ImageError::DownloadStorage { path, source }),
        }
    }
    Err(ImageError::DownloadStorage {
        path: dir.to_path_buf(),
        source: last_err,
    })
}

/// A name with a random alphanumeric suffix
pub(crate) fn random_name(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}
