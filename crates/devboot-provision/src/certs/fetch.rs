//! Root CA download.

use anyhow::Result;
use std::io::Read;
use std::time::Duration;

use devboot_core::BootstrapError;

use super::bundle::is_pem_certificate;

/// Transport-level attempts before a download is fatal.
pub const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Upper bound on the response body; a root CA is a few KB.
const MAX_PEM_BYTES: u64 = 1024 * 1024;

pub trait CertSource {
    /// Fetch PEM bytes from `url`.
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP download with a bounded retry count.
pub struct HttpCertSource {
    agent: ureq::Agent,
    attempts: u32,
    backoff: Duration,
}

impl Default for HttpCertSource {
    fn default() -> Self {
        Self::with_retry(DOWNLOAD_ATTEMPTS, Duration::from_secs(1))
    }
}

impl HttpCertSource {
    /// `attempts` tries, sleeping `backoff * attempt` between them.
    pub fn with_retry(attempts: u32, backoff: Duration) -> Self {
        Self {
            agent: make_agent(),
            attempts,
            backoff,
        }
    }
}

fn make_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(10))
        .timeout_read(Duration::from_secs(30))
        .build()
}

impl CertSource for HttpCertSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let mut reason = String::from("no attempt made");
        for attempt in 1..=self.attempts {
            match self.agent.get(url).call() {
                Ok(resp) => {
                    let mut bytes = Vec::new();
                    resp.into_reader()
                        .take(MAX_PEM_BYTES + 1)
                        .read_to_end(&mut bytes)
                        .map_err(|e| download_error(url, format!("reading body: {}", e)))?;
                    if bytes.len() as u64 > MAX_PEM_BYTES {
                        return Err(download_error(
                            url,
                            format!("response exceeds {} bytes", MAX_PEM_BYTES),
                        ));
                    }
                    if !is_pem_certificate(&bytes) {
                        return Err(download_error(url, "response is not a PEM certificate".to_string()));
                    }
                    return Ok(bytes);
                }
                Err(ureq::Error::Status(code, _)) => {
                    reason = format!("HTTP {}", code);
                    // Client errors will not change on retry.
                    if (400..500).contains(&code) {
                        break;
                    }
                }
                Err(ureq::Error::Transport(t)) => {
                    reason = t.to_string();
                }
            }
            tracing::debug!(attempt, url, reason = %reason, "root CA download failed");
            if attempt < self.attempts {
                std::thread::sleep(self.backoff * attempt);
            }
        }
        Err(download_error(url, reason))
    }
}

fn download_error(url: &str, reason: String) -> anyhow::Error {
    BootstrapError::Download {
        url: url.to_string(),
        reason,
    }
    .into()
}
