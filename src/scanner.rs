use crate::config::Config;
use crate::encoding::percent_encode;
use crate::session::MessageStatus;
use std::io;
use std::net::Shutdown;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Client side of the scanner's line protocol.
#[derive(Debug, Clone)]
pub struct Scanner {
    socket_path: PathBuf,
    timeout: Option<Duration>,
    max_response: usize,
}

impl Scanner {
    pub fn new(config: &Config) -> Self {
        Scanner {
            socket_path: config.scanner_socket.clone(),
            timeout: config.scanner_timeout(),
            max_response: config.max_response_bytes,
        }
    }

    /// One request/response round trip.
    ///
    /// The response is read until the scanner closes its side, capped at
    /// `max_response_bytes`; anything past the cap is dropped. The socket is
    /// closed on every path because the stream is owned by this call.
    pub async fn exchange(&self, request: &str) -> io::Result<String> {
        let round_trip = self.round_trip(request);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, round_trip)
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("scanner did not answer within {limit:?}"),
                    )
                })?,
            None => round_trip.await,
        }
    }

    async fn round_trip(&self, request: &str) -> io::Result<String> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;
        log::debug!("scanner <- {}", request.trim_end());

        stream.write_all(request.as_bytes()).await?;
        stream.shutdown().await?;

        let mut response = Vec::new();
        (&mut stream)
            .take(self.max_response as u64 + 1)
            .read_to_end(&mut response)
            .await?;
        if truncate_response(&mut response, self.max_response) {
            log::warn!(
                "Scanner response exceeded the {} byte limit and was truncated",
                self.max_response
            );
        }

        match stream.into_std()?.shutdown(Shutdown::Read) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => return Err(e),
            _ => {}
        }

        let response = String::from_utf8_lossy(&response).into_owned();
        log::debug!("scanner -> {}", response.trim_end());
        Ok(response)
    }

    /// Ask the scanner to process the spool directory of message `id`.
    pub async fn scan(&self, id: &str, dir: &Path) -> io::Result<MessageStatus> {
        let request = format!(
            "scan {} {}\n",
            percent_encode(id),
            percent_encode(&dir.to_string_lossy())
        );
        let response = self.exchange(&request).await?;
        let first_line = response.lines().next().unwrap_or_default();
        Ok(MessageStatus::from_response(first_line))
    }
}

/// Cut `response` down to `limit` bytes, reporting whether anything was dropped.
fn truncate_response(response: &mut Vec<u8>, limit: usize) -> bool {
    if response.len() > limit {
        response.truncate(limit);
        true
    } else {
        false
    }
}
