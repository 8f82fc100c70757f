//! Remote raster access over HTTP byte ranges.
//!
//! A cloud-optimized GeoTIFF can be opened without downloading it fully:
//! [`HttpRangeReader`] implements `Read + Seek` by fetching fixed-size
//! blocks with `Range` requests and caching them, so the TIFF decoder only
//! pulls the header and the chunks a window read touches.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT_RANGES, AUTHORIZATION, CONTENT_LENGTH, RANGE};
use tracing::debug;

use glacierwatch_core::error::{GlacierError, Result};

const BLOCK_SIZE: u64 = 1 << 20;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// What the COG probe learned about a remote asset.
#[derive(Debug, Clone)]
pub struct CogProbe {
    /// `Accept-Ranges` response header, if any.
    pub accept_ranges: Option<String>,
    /// `Content-Type` response header, if any.
    pub content_type: Option<String>,
    /// Whether the first bytes carry a TIFF magic number.
    pub tiff_magic: bool,
}

impl CogProbe {
    /// Range-readable and actually a TIFF.
    pub fn is_cog(&self) -> bool {
        self.accept_ranges.as_deref() == Some("bytes") && self.tiff_magic
    }
}

/// Check whether a remote asset supports ranged TIFF access: a `HEAD` for
/// `Accept-Ranges`, then a four-byte ranged `GET` for the TIFF magic.
pub fn probe_cog(client: &Client, url: &str, token: Option<&str>) -> Result<CogProbe> {
    let mut head = client.head(url).timeout(REQUEST_TIMEOUT);
    if let Some(token) = token {
        head = head.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    let head_resp = head
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|e| GlacierError::Http(format!("HEAD {url}: {e}")))?;

    let accept_ranges = header_string(&head_resp, ACCEPT_RANGES.as_str());
    let content_type = header_string(&head_resp, "content-type");

    let mut get = client
        .get(url)
        .timeout(REQUEST_TIMEOUT)
        .header(RANGE, "bytes=0-3");
    if let Some(token) = token {
        get = get.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    let magic = get
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .map_err(|e| GlacierError::Http(format!("GET {url}: {e}")))?;

    let tiff_magic = magic.starts_with(b"II*\x00")
        || magic.starts_with(b"MM\x00*")
        || magic.starts_with(b"II+\x00")
        || magic.starts_with(b"MM\x00+");

    Ok(CogProbe {
        accept_ranges,
        content_type,
        tiff_magic,
    })
}

fn header_string(resp: &reqwest::blocking::Response, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `Read + Seek` over a remote URL, backed by block-aligned `Range` GETs.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    token: Option<String>,
    length: u64,
    position: u64,
    blocks: HashMap<u64, Vec<u8>>,
}

impl HttpRangeReader {
    /// Open a remote asset, learning its total length from a `HEAD`.
    pub fn open(client: Client, url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let url = url.into();
        let mut head = client.head(&url).timeout(REQUEST_TIMEOUT);
        if let Some(token) = &token {
            head = head.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let resp = head
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| GlacierError::Http(format!("HEAD {url}: {e}")))?;

        let length = header_string(&resp, CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| GlacierError::Http(format!("{url}: no Content-Length")))?;

        Ok(Self {
            client,
            url,
            token,
            length,
            position: 0,
            blocks: HashMap::new(),
        })
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn fetch_block(&mut self, block_index: u64) -> io::Result<&[u8]> {
        if !self.blocks.contains_key(&block_index) {
            let start = block_index * BLOCK_SIZE;
            let end = (start + BLOCK_SIZE - 1).min(self.length.saturating_sub(1));
            debug!(url = %self.url, start, end, "Fetching byte range");

            let mut get = self
                .client
                .get(&self.url)
                .timeout(REQUEST_TIMEOUT)
                .header(RANGE, format!("bytes={start}-{end}"));
            if let Some(token) = &self.token {
                get = get.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            let bytes = get
                .send()
                .and_then(|r| r.error_for_status())
                .and_then(|r| r.bytes())
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            self.blocks.insert(block_index, bytes.to_vec());
        }
        Ok(self.blocks.get(&block_index).expect("just inserted"))
    }
}

impl Read for HttpRangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.length || buf.is_empty() {
            return Ok(0);
        }

        let block_index = self.position / BLOCK_SIZE;
        let offset = (self.position % BLOCK_SIZE) as usize;
        let block = self.fetch_block(block_index)?;

        let available = block.len().saturating_sub(offset);
        let count = available.min(buf.len());
        buf[..count].copy_from_slice(&block[offset..offset + count]);
        self.position += count as u64;
        Ok(count)
    }
}

impl Seek for HttpRangeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.length as i64 + offset,
            SeekFrom::Current(offset) => self.position as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_requires_both_ranges_and_magic() {
        let probe = CogProbe {
            accept_ranges: Some("bytes".to_string()),
            content_type: Some("image/tiff".to_string()),
            tiff_magic: true,
        };
        assert!(probe.is_cog());

        let probe = CogProbe {
            accept_ranges: None,
            content_type: None,
            tiff_magic: true,
        };
        assert!(!probe.is_cog());

        let probe = CogProbe {
            accept_ranges: Some("bytes".to_string()),
            content_type: None,
            tiff_magic: false,
        };
        assert!(!probe.is_cog());
    }
}
