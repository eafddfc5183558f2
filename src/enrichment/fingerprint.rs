//! Audio fingerprint generation using Chromaprint/fpcalc
//!
//! This module shells out to the `fpcalc` command-line tool (part of Chromaprint)
//! to generate audio fingerprints.
//!
//! Install fpcalc:
//! - Windows: `winget install AcoustID.Chromaprint` or download from https://acoustid.org/chromaprint
//! - macOS: `brew install chromaprint`
//! - Linux: `apt install libchromaprint-tools` or equivalent

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::domain::{AudioFingerprint, EnrichmentError};

/// Common installation paths for fpcalc on Windows
#[cfg(windows)]
const FPCALC_PATHS: &[&str] = &[
    "fpcalc", // In PATH
    r"C:\Program Files\Chromaprint\fpcalc.exe",
    r"C:\Program Files\MusicBrainz Picard\fpcalc.exe",
];

#[cfg(not(windows))]
const FPCALC_PATHS: &[&str] = &[
    "fpcalc", // In PATH
    "/usr/bin/fpcalc",
    "/usr/local/bin/fpcalc",
    "/opt/homebrew/bin/fpcalc",
];

fn responds(path: &Path) -> bool {
    Command::new(path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// A located fpcalc executable.
#[derive(Debug, Clone)]
pub struct Fpcalc {
    path: PathBuf,
}

impl Fpcalc {
    /// Use the configured executable, or search the common locations.
    pub fn locate(configured: Option<&Path>) -> Option<Self> {
        let found = match configured {
            Some(path) => responds(path).then(|| path.to_path_buf()),
            None => FPCALC_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|path| responds(path)),
        };
        found.map(|path| Self { path })
    }

    /// fpcalc version string (for `check`)
    pub fn version(&self) -> Option<String> {
        Command::new(&self.path)
            .arg("-version")
            .output()
            .ok()
            .filter(|o| o.status.success())
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
    }

    /// Generate an audio fingerprint for the given file
    pub async fn fingerprint(&self, file: &Path) -> Result<AudioFingerprint, EnrichmentError> {
        let output = tokio::process::Command::new(&self.path)
            .arg("-json")
            .arg(file)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EnrichmentError::Fingerprint {
                code: None,
                message: format!("Failed to run fpcalc: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EnrichmentError::Fingerprint {
                code: output.status.code(),
                message: format!("fpcalc failed: {}", stderr.trim()),
            });
        }

        parse_fpcalc_json(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse the JSON output from fpcalc
fn parse_fpcalc_json(json: &str) -> Result<AudioFingerprint, EnrichmentError> {
    let parsed: FpcalcOutput =
        serde_json::from_str(json).map_err(|e| EnrichmentError::Fingerprint {
            code: None,
            message: format!("Failed to parse fpcalc output: {e}"),
        })?;

    Ok(AudioFingerprint {
        fingerprint: parsed.fingerprint,
        duration_secs: parsed.duration.round() as u32,
    })
}

/// fpcalc JSON output structure
#[derive(serde::Deserialize)]
struct FpcalcOutput {
    fingerprint: String,
    duration: f64,
}
