//! HTTP downloads into the cache directory.
//!
//! ZFS release tarballs, their signatures and archived kernel headers all go
//! through [`fetch`]: retries with exponential backoff, range resume of a
//! `.part` file, and optional SHA-256 pinning of both fresh and cached files.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// How a single download behaves.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Whole-request timeout; `None` for large files on slow mirrors.
    pub timeout: Option<Duration>,
    pub retries: u32,
    /// Delay before the first retry, doubling each retry.
    pub retry_delay: Duration,
    pub show_progress: bool,
    /// Expected SHA-256. A cached file that does not match is fetched again.
    pub sha256: Option<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            retries: 3,
            retry_delay: Duration::from_secs(2),
            show_progress: true,
            sha256: None,
        }
    }
}

impl DownloadOptions {
    /// Small files such as detached signatures.
    pub fn small() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            retry_delay: Duration::from_secs(1),
            show_progress: false,
            ..Self::default()
        }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    /// Delay before retry number `attempt` (1-based), capped at 16x.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay * (1 << (attempt.saturating_sub(1)).min(4))
    }
}

/// Non-success HTTP status.
#[derive(Debug, thiserror::Error)]
#[error("HTTP {status} for {url}")]
pub struct HttpStatusError {
    pub status: u16,
    pub url: String,
}

/// Bytes received so far, for the progress line.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub received: u64,
    pub total: Option<u64>,
}

impl Progress {
    pub fn percent(&self) -> Option<u8> {
        match self.total {
            Some(0) => Some(0),
            Some(total) => Some(((self.received.min(total) * 100) / total) as u8),
            None => None,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mib = |b: u64| b as f64 / (1024.0 * 1024.0);
        match (self.total, self.percent()) {
            (Some(total), Some(pct)) => {
                write!(f, "{:.1}/{:.1} MiB ({}%)", mib(self.received), mib(total), pct)
            }
            _ => write!(f, "{:.1} MiB", mib(self.received)),
        }
    }
}

/// `dest` with `.part` appended to its file name.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Download `url` to `dest` unless a good copy is already cached.
///
/// Blocks the caller on a private tokio runtime. The body goes to
/// `<dest>.part` first and is renamed once complete (and verified, when
/// `options.sha256` is set), so `dest` never holds a truncated file.
pub fn fetch(url: &str, dest: &Path, options: &DownloadOptions) -> Result<()> {
    if dest.exists() {
        match &options.sha256 {
            None => {
                println!("  [SKIP] {} already downloaded", dest.display());
                return Ok(());
            }
            Some(expected) => match verify_sha256(dest, expected) {
                Ok(()) => {
                    println!("  [SKIP] {} already downloaded (checksum OK)", dest.display());
                    return Ok(());
                }
                Err(e) => {
                    println!("  [WARN] {:#}; downloading again", e);
                    std::fs::remove_file(dest)
                        .with_context(|| format!("Failed to remove {}", dest.display()))?;
                }
            },
        }
    }

    let partial = partial_path(dest);
    println!("  Downloading {}", url);
    let rt = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    rt.block_on(http(url, &partial, options))?;

    if let Some(expected) = &options.sha256 {
        if let Err(e) = verify_sha256(&partial, expected) {
            let _ = std::fs::remove_file(&partial);
            return Err(e.context(format!("Download of {} is corrupt", url)));
        }
    }
    std::fs::rename(&partial, dest)
        .with_context(|| format!("Failed to move {} into place", partial.display()))?;
    tracing::info!(url, dest = %dest.display(), "downloaded");
    Ok(())
}

/// Download into `dest`, resuming a partial file and retrying transient
/// failures.
pub async fn http(url: &str, dest: &Path, options: &DownloadOptions) -> Result<()> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("archlive/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;

    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = options.backoff(attempt);
            if options.show_progress {
                println!("    Retry {}/{} in {:?}...", attempt, options.retries, delay);
            }
            tokio::time::sleep(delay).await;
        }
        attempt += 1;

        match http_attempt(&client, url, dest, options).await {
            Ok(()) => return Ok(()),
            Err(e) if is_retryable(&e) && attempt <= options.retries => {
                tracing::warn!(url, attempt, error = %format!("{:#}", e), "download attempt failed");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Giving up on {} after {} attempt(s)", url, attempt))
            }
        }
    }
}

async fn http_attempt(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    options: &DownloadOptions,
) -> Result<()> {
    let start = std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0);

    let mut request = client.get(url);
    if let Some(timeout) = options.timeout {
        request = request.timeout(timeout);
    }
    if start > 0 {
        request = request.header(reqwest::header::RANGE, format!("bytes={}-", start));
        tracing::debug!(url, start, "resuming partial download");
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("HTTP request failed: {}", url))?;

    let status = response.status();
    if status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
        // partial file is already complete
        return Ok(());
    }
    if !status.is_success() {
        return Err(HttpStatusError {
            status: status.as_u16(),
            url: url.to_string(),
        }
        .into());
    }

    // 200 to a range request: the server ignored the range, start over
    let resuming = start > 0 && status == reqwest::StatusCode::PARTIAL_CONTENT;
    let offset = if resuming { start } else { 0 };
    let total = response.content_length().map(|len| len + offset);

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .append(resuming)
        .truncate(!resuming)
        .open(dest)
        .await
        .with_context(|| format!("Failed to open {}", dest.display()))?;
    let mut writer = tokio::io::BufWriter::new(file);

    let mut progress = Progress {
        received: offset,
        total,
    };
    let mut shown = progress.percent();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("Failed to read body of {}", url))?;
        writer
            .write_all(&chunk)
            .await
            .with_context(|| format!("Failed to write to {}", dest.display()))?;
        progress.received += chunk.len() as u64;

        if options.show_progress && progress.percent() > shown {
            shown = progress.percent();
            print!("\r    {}", progress);
            use std::io::Write;
            std::io::stdout().flush().ok();
        }
    }
    writer
        .flush()
        .await
        .with_context(|| format!("Failed to flush {}", dest.display()))?;
    if options.show_progress {
        println!();
    }

    if let Some(total) = total {
        if progress.received < total {
            bail!(
                "Connection closed early: got {} of {} bytes from {}",
                progress.received,
                total,
                url
            );
        }
    }
    Ok(())
}

/// Timeouts, connection failures, early EOF and 408/429/5xx gateway errors.
fn is_retryable(e: &anyhow::Error) -> bool {
    use std::io::ErrorKind;
    e.chain().any(|cause| {
        if let Some(err) = cause.downcast_ref::<reqwest::Error>() {
            return err.is_timeout() || err.is_connect() || err.is_body();
        }
        if let Some(err) = cause.downcast_ref::<HttpStatusError>() {
            return matches!(err.status, 408 | 429 | 500 | 502 | 503 | 504);
        }
        if let Some(err) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                err.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
            );
        }
        cause.to_string().starts_with("Connection closed early")
    })
}

/// SHA-256 of a file, lowercase hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {} for checksum", path.display()))?;
    let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let n = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fail unless `path` hashes to `expected` (hex, any case).
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if actual != expected.trim().to_lowercase() {
        bail!(
            "Checksum mismatch for {}\n  Expected: {}\n  Actual:   {}",
            path.display(),
            expected.trim(),
            actual
        );
    }
    Ok(())
}
