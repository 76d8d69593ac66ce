//! Agent polling: one `current` snapshot, then a long-lived `sample` stream.

#![allow(missing_docs)]

use std::io::{BufRead, BufReader, Read};
use std::time::Duration;

use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::BridgeError;
use crate::snapshot::SnapshotSource;

#[derive(Clone)]
pub struct AgentClient {
    agent: ureq::Agent,
    base: String,
    interval_ms: u64,
    count: u64,
}

impl AgentClient {
    #[must_use]
    pub fn new(config: &AgentConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .build();
        Self {
            agent,
            base: config.base_url(),
            interval_ms: config.interval_ms,
            count: config.count,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Issues a GET relative to the agent base; anything but 200 is an error.
    pub fn fetch(&self, path: &str) -> Result<ureq::Response, BridgeError> {
        let url = format!("{}{}", self.base, path);
        info!(%url, "agent request");
        let response = self.agent.get(&url).call().map_err(|err| match err {
            ureq::Error::Status(code, response) => BridgeError::Transport(
                format!("GET {url} failed: {code} {}", response.status_text()).into(),
            ),
            ureq::Error::Transport(transport) => {
                BridgeError::Transport(format!("GET {url} failed: {transport}").into())
            }
        })?;
        if response.status() != 200 {
            return Err(BridgeError::Transport(
                format!(
                    "GET {url} failed: {} {}",
                    response.status(),
                    response.status_text()
                )
                .into(),
            ));
        }
        info!(%url, status = response.status(), "agent response");
        Ok(response)
    }

    pub fn current(&self) -> Result<String, BridgeError> {
        self.fetch("/current")?
            .into_string()
            .map_err(|err| BridgeError::Transport(format!("read current: {err}").into()))
    }

    #[must_use]
    pub fn sample_path(&self, sequence: &str) -> String {
        format!(
            "/sample?interval={}&count={}&from={sequence}",
            self.interval_ms, self.count
        )
    }

    /// Streams from `sequence`, calling `on_chunk` once per received chunk in
    /// arrival order. Returns the number of chunks delivered once the agent
    /// closes the stream.
    pub fn stream_from<F>(&self, sequence: &str, mut on_chunk: F) -> Result<usize, BridgeError>
    where
        F: FnMut(&[u8]),
    {
        let response = self.fetch(&self.sample_path(sequence))?;
        let boundary = response
            .header("Content-Type")
            .and_then(boundary_from_content_type);
        if boundary.is_none() {
            debug!("sample response is not multipart, treating body as one chunk");
        }
        let reader = BufReader::new(response.into_reader());
        let mut delivered = 0usize;
        for chunk in MultipartChunks::new(reader, boundary) {
            match chunk {
                Ok(chunk) => {
                    delivered += 1;
                    debug!(bytes = chunk.len(), index = delivered, "sample chunk");
                    on_chunk(&chunk);
                }
                Err(err) => {
                    warn!(%err, "sample stream ended with error");
                    return Err(err);
                }
            }
        }
        info!(chunks = delivered, "sample stream closed");
        Ok(delivered)
    }
}

impl SnapshotSource for AgentClient {
    fn current_snapshot(&self) -> Result<String, BridgeError> {
        self.current()
    }
}

/// Extracts the multipart boundary from a `Content-Type` header value.
#[must_use]
pub fn boundary_from_content_type(content_type: &str) -> Option<SmolStr> {
    let mut parts = content_type.split(';');
    let media = parts.next()?.trim().to_ascii_lowercase();
    if !media.starts_with("multipart/") {
        return None;
    }
    parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim().trim_matches('"');
            (!value.is_empty()).then(|| SmolStr::new(value))
        } else {
            None
        }
    })
}

/// Splits a `multipart/x-mixed-replace` body into its parts.
///
/// Without a boundary the whole body is yielded once.
pub struct MultipartChunks<R> {
    reader: R,
    delimiter: Option<Vec<u8>>,
    at_part: bool,
    done: bool,
}

impl<R: BufRead> MultipartChunks<R> {
    pub fn new(reader: R, boundary: Option<SmolStr>) -> Self {
        Self {
            reader,
            delimiter: boundary.map(|boundary| format!("--{boundary}").into_bytes()),
            at_part: false,
            done: false,
        }
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>, BridgeError> {
        let mut line = Vec::new();
        let read = self
            .reader
            .read_until(b'\n', &mut line)
            .map_err(|err| BridgeError::Transport(format!("read stream: {err}").into()))?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    /// Consumes lines up to and including the next delimiter. `false` means
    /// the stream ended or the closing delimiter was seen.
    fn seek_part(&mut self, delimiter: &[u8]) -> Result<bool, BridgeError> {
        while let Some(line) = self.read_line()? {
            let trimmed = trim_line(&line);
            if trimmed == delimiter {
                return Ok(true);
            }
            if trimmed.starts_with(delimiter) && trimmed.ends_with(b"--") {
                return Ok(false);
            }
        }
        Ok(false)
    }

    fn read_part(&mut self, delimiter: &[u8]) -> Result<Option<Vec<u8>>, BridgeError> {
        if !self.at_part && !self.seek_part(delimiter)? {
            return Ok(None);
        }
        self.at_part = false;

        let mut content_length = None;
        loop {
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            let header = trim_line(&line);
            if header.is_empty() {
                break;
            }
            let header = String::from_utf8_lossy(header);
            if let Some((name, value)) = header.split_once(':') {
                if name.trim().eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse::<usize>().ok();
                }
            }
        }

        if let Some(length) = content_length {
            let mut body = vec![0u8; length];
            self.reader.read_exact(&mut body).map_err(|err| {
                BridgeError::Transport(format!("truncated part ({length} bytes): {err}").into())
            })?;
            return Ok(Some(body));
        }

        let mut body = Vec::new();
        while let Some(line) = self.read_line()? {
            let trimmed = trim_line(&line);
            if trimmed == delimiter {
                self.at_part = true;
                break;
            }
            if trimmed.starts_with(delimiter) && trimmed.ends_with(b"--") {
                self.done = true;
                break;
            }
            body.extend_from_slice(&line);
        }
        while body.last().is_some_and(|byte| *byte == b'\n' || *byte == b'\r') {
            body.pop();
        }
        Ok(Some(body))
    }
}

impl<R: BufRead> Iterator for MultipartChunks<R> {
    type Item = Result<Vec<u8>, BridgeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let Some(delimiter) = self.delimiter.clone() else {
            self.done = true;
            let mut body = Vec::new();
            return match self.reader.read_to_end(&mut body) {
                Ok(_) if body.is_empty() => None,
                Ok(_) => Some(Ok(body)),
                Err(err) => Some(Err(BridgeError::Transport(
                    format!("read stream: {err}").into(),
                ))),
            };
        };
        match self.read_part(&delimiter) {
            Ok(Some(body)) => Some(Ok(body)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &line[..end]
}
