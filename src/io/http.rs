use async_trait::async_trait;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, HeaderMap, HeaderName, RANGE};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use super::ReadAt;
use anyhow::{Context, Result, bail};

const MAX_ATTEMPTS: u32 = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP Range reader for remote CBZ files.
///
/// Only the central directory and the members actually copied are fetched,
/// so splitting a remote comic downloads each page once.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
}

/// Make ring the process-wide rustls provider unless one is already set.
pub(crate) fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        // Err means another thread installed one first
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
}

impl HttpRangeReader {
    /// Probe `url` with a HEAD request.
    ///
    /// The server must advertise `Accept-Ranges: bytes` and a Content-Length.
    pub async fn new(url: String) -> Result<Self> {
        install_crypto_provider();
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let resp = client
            .head(&url)
            .send()
            .await
            .with_context(|| format!("HEAD {}", url))?;
        if !resp.status().is_success() {
            bail!("HEAD {} returned {}", url, resp.status());
        }

        let headers = resp.headers();
        let ranges = headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");
        if !ranges.contains("bytes") {
            bail!("{} does not support Range requests", url);
        }
        let size = header_u64(headers, CONTENT_LENGTH)
            .with_context(|| format!("{} did not return Content-Length", url))?;

        debug!(%url, size, "remote archive supports range requests");

        Ok(Self {
            client,
            url,
            size,
        })
    }

    /// GET `bytes=start-end`, retrying connection failures with linear backoff.
    async fn fetch(&self, start: u64, end: u64) -> Result<reqwest::Response> {
        let range = format!("bytes={}-{}", start, end);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(&self.url).header(RANGE, &range).send().await {
                Ok(resp) if resp.status() == StatusCode::PARTIAL_CONTENT => return Ok(resp),
                Ok(resp) => bail!("GET {} ({}) returned {}", self.url, range, resp.status()),
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < MAX_ATTEMPTS => {
                    warn!(attempt, max = MAX_ATTEMPTS, error = %e, "range request failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                }
                Err(e) => return Err(e).with_context(|| format!("GET {} ({})", self.url, range)),
            }
        }
    }
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let wanted = (end - offset + 1) as usize;
        let mut received = 0;

        // Servers may answer with less than the requested range
        while received < wanted {
            let body = self.fetch(offset + received as u64, end).await?.bytes().await?;
            if body.is_empty() {
                bail!("{} returned an empty range at {}", self.url, offset + received as u64);
            }
            let n = body.len().min(wanted - received);
            buf[received..received + n].copy_from_slice(&body[..n]);
            received += n;
        }

        Ok(received)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

fn header_u64(headers: &HeaderMap, name: HeaderName) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
