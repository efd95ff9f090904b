//! Trust-bundle files: containment check and append-only mutation.

use anyhow::{Context, Result};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Who a bundle belongs to; decides whether devboot may mutate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleOwner {
    /// Reported by the base interpreter (never mutated on cluster hosts).
    System,
    /// The repository's own environment.
    ProjectVenv,
    /// The repository environment, stored in scratch and reached through a symlink.
    ScratchVenv,
    /// Dedicated environment hosting only the trust package.
    TrustVenv,
    /// Externally designated primary environment.
    PrimaryVenv,
}

impl fmt::Display for BundleOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::System => "system",
            Self::ProjectVenv => "project venv",
            Self::ScratchVenv => "scratch venv",
            Self::TrustVenv => "trust-package venv",
            Self::PrimaryVenv => "primary venv",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub path: PathBuf,
    pub owner: BundleOwner,
}

impl CertificateBundle {
    pub fn new(path: impl Into<PathBuf>, owner: BundleOwner) -> Self {
        Self {
            path: path.into(),
            owner,
        }
    }
}

/// True if `bytes` holds at least one PEM certificate block.
pub fn is_pem_certificate(bytes: &[u8]) -> bool {
    let text = String::from_utf8_lossy(bytes);
    match (text.find(PEM_BEGIN), text.find(PEM_END)) {
        (Some(begin), Some(end)) => begin < end,
        _ => false,
    }
}

/// Base64 body of the first certificate, whitespace removed.
pub fn pem_body(pem: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(pem);
    let start = text.find(PEM_BEGIN)? + PEM_BEGIN.len();
    let end = start + text[start..].find(PEM_END)?;
    let body: String = text[start..end].split_whitespace().collect();
    if body.is_empty() {
        None
    } else {
        Some(body)
    }
}

/// Whether the bundle already trusts the CA: the marker is present, or the
/// certificate body itself is (appended earlier without the marker header).
/// A missing bundle contains nothing.
pub fn contains_ca(bundle: &Path, marker: &str, pem: Option<&[u8]>) -> Result<bool> {
    let content = match fs::read(bundle) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", bundle.display()));
        }
    };
    if content.contains(marker) {
        return Ok(true);
    }
    let Some(body) = pem.and_then(pem_body) else {
        return Ok(false);
    };
    let compact: String = content.split_whitespace().collect();
    Ok(compact.contains(&body))
}

/// Append `# <marker>` and the PEM to an existing bundle in a single write.
/// Never creates, truncates or rewrites the file.
pub fn append_ca(bundle: &Path, marker: &str, pem: &[u8]) -> Result<()> {
    let needs_newline = fs::read(bundle)
        .map(|b| !b.is_empty() && !b.ends_with(b"\n"))
        .with_context(|| format!("Failed to read {}", bundle.display()))?;

    let mut chunk = Vec::with_capacity(pem.len() + marker.len() + 8);
    if needs_newline {
        chunk.push(b'\n');
    }
    chunk.extend_from_slice(format!("\n# {}\n", marker).as_bytes());
    chunk.extend_from_slice(pem);
    if !pem.ends_with(b"\n") {
        chunk.push(b'\n');
    }

    let mut file = OpenOptions::new()
        .append(true)
        .open(bundle)
        .with_context(|| format!("Failed to open {} for append", bundle.display()))?;
    file.write_all(&chunk)
        .with_context(|| format!("Failed to append to {}", bundle.display()))?;
    Ok(())
}

/// Check writability by opening for append without writing.
pub fn is_writable(bundle: &Path) -> bool {
    OpenOptions::new().append(true).open(bundle).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIUZm9v\nYmFyYmF6\n-----END CERTIFICATE-----\n";

    #[test]
    fn test_append_is_guarded_by_containment() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle = tmp.path().join("cacert.pem");
        fs::write(&bundle, "# Issuer: Some Public CA\n-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----").unwrap();

        assert!(!contains_ca(&bundle, "Example Root CA", Some(PEM.as_bytes())).unwrap());
        append_ca(&bundle, "Example Root CA", PEM.as_bytes()).unwrap();
        assert!(contains_ca(&bundle, "Example Root CA", None).unwrap());

        let content = fs::read_to_string(&bundle).unwrap();
        assert!(content.starts_with("# Issuer: Some Public CA\n"));
        assert!(content.contains("-----END CERTIFICATE-----\n\n# Example Root CA\n-----BEGIN"));
        assert_eq!(content.matches("Example Root CA").count(), 1);
    }

    #[test]
    fn test_body_match_without_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle = tmp.path().join("cacert.pem");
        // Added by some other tool, wrapped differently and without our header.
        fs::write(
            &bundle,
            "-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIUZm9vYmFy\nYmF6\n-----END CERTIFICATE-----\n",
        )
        .unwrap();
        assert!(contains_ca(&bundle, "Example Root CA", Some(PEM.as_bytes())).unwrap());
        assert!(!contains_ca(&bundle, "Example Root CA", None).unwrap());
    }

    #[test]
    fn test_missing_bundle_is_not_created() {
        let tmp = tempfile::tempdir().unwrap();
        let bundle = tmp.path().join("absent.pem");
        assert!(!contains_ca(&bundle, "Example Root CA", None).unwrap());
        assert!(append_ca(&bundle, "Example Root CA", PEM.as_bytes()).is_err());
        assert!(!bundle.exists());
        assert!(!is_writable(&bundle));
    }

    #[test]
    fn test_pem_helpers() {
        assert!(is_pem_certificate(PEM.as_bytes()));
        assert!(!is_pem_certificate(b"<html>login required</html>"));
        assert_eq!(pem_body(PEM.as_bytes()).as_deref(), Some("MIIBszCCAVmgAwIBAgIUZm9vYmFyYmF6"));
    }
}
