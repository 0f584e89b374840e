use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::{Client, Url};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("cannot create file {}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot get url {url}")]
    Request {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("cannot read response body from {url}")]
    Body {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("cannot write response body to {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Downloader {
    /// Plain client: default headers, no timeout, no retries.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self { client })
    }

    /// Streams `url` into `dest`, creating or truncating it first.
    ///
    /// Any response the transport completes is written out, whatever its
    /// status code. Returns the number of body bytes written.
    pub async fn fetch_to(&self, url: &Url, dest: &Path) -> Result<u64, DownloadError> {
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| DownloadError::Create {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let mut file = File::create(dest)
            .await
            .map_err(|source| DownloadError::Create {
                path: dest.to_path_buf(),
                source,
            })?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| DownloadError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, %status, "non-success response, writing body anyway");
        }

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| DownloadError::Body {
                url: url.clone(),
                source,
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|source| DownloadError::Write {
                    path: dest.to_path_buf(),
                    source,
                })?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|source| DownloadError::Write {
            path: dest.to_path_buf(),
            source,
        })?;

        debug!(%url, dest = %dest.display(), bytes = written, "download finished");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn writes_body_and_creates_parent_dirs() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/spec.yml");
                then.status(200).body("openapi: 3.0.0\n");
            })
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("nested/out/spec.yml");
        let url = Url::parse(&server.url("/spec.yml")).unwrap();

        let written = Downloader::new()
            .unwrap()
            .fetch_to(&url, &dest)
            .await
            .unwrap();

        assert_eq!(written, 15);
        assert_eq!(std::fs::read(&dest).unwrap(), b"openapi: 3.0.0\n");
    }

    #[tokio::test]
    async fn error_status_is_written_like_success() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/missing.zip");
                then.status(404).body("Not Found");
            })
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("missing.zip");
        let url = Url::parse(&server.url("/missing.zip")).unwrap();

        Downloader::new()
            .unwrap()
            .fetch_to(&url, &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"Not Found");
    }

    #[tokio::test]
    async fn connection_failure_leaves_empty_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("swag.zip");
        let port = {
            let freed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            freed.local_addr().unwrap().port()
        };
        let url = Url::parse(&format!("http://127.0.0.1:{port}/swag.zip")).unwrap();

        let err = Downloader::new()
            .unwrap()
            .fetch_to(&url, &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Request { .. }));
        assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
    }
}
