//! Fetching documents from directory peers over HTTP

use std::io::Read;
use std::time::Duration;

use super::DirectoryPeer;
use crate::error::SourceError;

//
// External dependencies
//
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

/// Upper bound on a response body, compressed or not
const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// Status and decompressed body of one HTTP round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Something that can retrieve a resource from a directory peer.
///
/// Non-200 statuses are results, not errors; only transport and
/// decompression failures are errors.
pub trait DescriptorFetcher: Send + Sync {
    fn fetch(&self, peer: &DirectoryPeer, path: &str) -> Result<FetchResult, SourceError>;
}

/// The production fetcher, one blocking HTTP request per call
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> HttpFetcher {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .build();
        HttpFetcher { agent }
    }
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher").finish_non_exhaustive()
    }
}

impl DescriptorFetcher for HttpFetcher {
    fn fetch(&self, peer: &DirectoryPeer, path: &str) -> Result<FetchResult, SourceError> {
        let url = format!("http://{}{}", peer.address, path);
        tracing::debug!(%url, "requesting");
        let response = match self.agent.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                return Ok(FetchResult {
                    status,
                    body: Vec::new(),
                })
            }
            Err(ureq::Error::Transport(e)) => {
                return Err(SourceError::Transport {
                    url,
                    message: e.to_string(),
                })
            }
        };

        let status = response.status();
        let gzip = response
            .header("Content-Encoding")
            .map_or(false, |e| e.eq_ignore_ascii_case("gzip"));
        let mut raw = Vec::new();
        response
            .into_reader()
            .take(MAX_BODY_BYTES)
            .read_to_end(&mut raw)
            .map_err(|e| SourceError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;
        let body = if status == 200 { decompress(&raw, gzip)? } else { Vec::new() };
        Ok(FetchResult { status, body })
    }
}

fn read_all(reader: impl Read) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.take(MAX_BODY_BYTES).read_to_end(&mut out)?;
    Ok(out)
}

/// Decompress a directory response body.
///
/// Directory servers send zlib data whatever the headers claim. Gzip is
/// tried first if announced, then zlib. A body that looks like a plain
/// document is taken as is, anything else must be raw deflate.
pub fn decompress(raw: &[u8], gzip: bool) -> Result<Vec<u8>, SourceError> {
    if gzip {
        if let Ok(body) = read_all(GzDecoder::new(raw)) {
            return Ok(body);
        }
    }
    let zlib_error = match read_all(ZlibDecoder::new(raw)) {
        Ok(body) => return Ok(body),
        Err(e) => e,
    };
    if raw.is_empty() || raw[0] == b'@' || raw[0].is_ascii_alphabetic() {
        return Ok(raw.to_vec());
    }
    if let Ok(body) = read_all(DeflateDecoder::new(raw)) {
        if !body.is_empty() {
            return Ok(body);
        }
    }
    Err(SourceError::Decompression(zlib_error))
}
