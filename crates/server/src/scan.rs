//! Malware scan gate.
//!
//! Completed uploads pass through a scanner before promotion. The
//! default implementation shells out to `clamscan`; exit code 1 means
//! infected, with signature names parsed from stdout.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Outcome of scanning one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanVerdict {
    pub infected: bool,
    /// Signature names reported by the scanner, empty when clean.
    pub signatures: Vec<String>,
}

impl ScanVerdict {
    pub fn clean() -> Self {
        Self {
            infected: false,
            signatures: Vec::new(),
        }
    }
}

/// Malware scanner seam.
#[async_trait]
pub trait MalwareScanner: Send + Sync {
    async fn scan(&self, path: &Path) -> std::io::Result<ScanVerdict>;
}

/// ClamAV implementation via the `clamscan` binary.
pub struct ClamScanner {
    binary: PathBuf,
}

impl ClamScanner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl MalwareScanner for ClamScanner {
    async fn scan(&self, path: &Path) -> std::io::Result<ScanVerdict> {
        let output = Command::new(&self.binary)
            .arg("--no-summary")
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await?;

        // clamscan: 0 = clean, 1 = virus found, 2+ = scanner error.
        match output.status.code() {
            Some(0) => Ok(ScanVerdict::clean()),
            Some(1) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                Ok(ScanVerdict {
                    infected: true,
                    signatures: parse_signatures(&stdout),
                })
            }
            other => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(std::io::Error::other(format!(
                    "clamscan failed with status {other:?}: {}",
                    stderr.trim()
                )))
            }
        }
    }
}

/// Parse signature names from clamscan stdout lines of the form
/// `/path/to/file: Signature-Name FOUND`.
fn parse_signatures(stdout: &str) -> Vec<String> {
    let mut signatures: Vec<String> = stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_suffix("FOUND")?.trim_end();
            let (_, name) = rest.rsplit_once(": ")?;
            Some(name.to_string())
        })
        .collect();
    signatures.dedup();
    signatures
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_signature() {
        let stdout = "/data/spool/abc.part: Eicar-Test-Signature FOUND\n";
        assert_eq!(parse_signatures(stdout), vec!["Eicar-Test-Signature"]);
    }

    #[test]
    fn test_parse_ignores_clean_and_noise_lines() {
        let stdout = "\
/data/a.part: OK
/data/b.part: Win.Test.EICAR_HDB-1 FOUND
LibClamAV Warning: something
";
        assert_eq!(parse_signatures(stdout), vec!["Win.Test.EICAR_HDB-1"]);
    }

    #[test]
    fn test_parse_path_with_colons() {
        let stdout = "/data/odd: name.part: Some.Sig FOUND\n";
        assert_eq!(parse_signatures(stdout), vec!["Some.Sig"]);
    }

    #[test]
    fn test_no_signatures_when_clean() {
        assert!(parse_signatures("/data/a.part: OK\n").is_empty());
    }
}
