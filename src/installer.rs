use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::archive::extract_executable;
use crate::platform::Platform;
use crate::receipt::{InstallReceipt, save_receipt};
use crate::release::ReleaseSource;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("release {version} has no archive for {platform}")]
    NoMatchingAsset { version: String, platform: String },
    #[error("checksum mismatch for {archive}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        archive: String,
        expected: String,
        actual: String,
    },
    #[error("{checksums} has no usable SHA-256 for {archive}")]
    ChecksumUnavailable { checksums: String, archive: String },
    #[error("extracting archive failed: {0}")]
    Extract(String),
    #[error("archive {archive} does not contain '{executable}'")]
    MissingExecutable { archive: String, executable: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Release tag to install instead of the latest one.
    pub release: Option<String>,
    pub expected_sha256: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InstalledBinary {
    pub path: PathBuf,
    pub version: String,
    pub asset: String,
    pub sha256: String,
}

/// Fetch the release archive for `platform` and place its executable at `target`.
pub fn install_binary(
    source: &dyn ReleaseSource,
    platform: &Platform,
    target: &Path,
    options: &InstallOptions,
) -> Result<InstalledBinary, InstallError> {
    let version = match &options.release {
        Some(tag) => tag.clone(),
        None => source.latest_version()?,
    };
    info!(
        "installing {} {} to {}",
        platform.binary_name(),
        version,
        target.display()
    );

    let archive = source.download_archive(platform, &version)?;
    let actual = sha256_hex(&archive.bytes);
    match options.expected_sha256.as_ref().or(archive.sha256.as_ref()) {
        Some(expected) if !expected.eq_ignore_ascii_case(&actual) => {
            return Err(InstallError::ChecksumMismatch {
                archive: archive.name,
                expected: expected.to_lowercase(),
                actual,
            });
        }
        Some(_) => debug!("checksum verified for {}", archive.name),
        None => warn!("no checksum published for {}, skipping verification", archive.name),
    }

    let bin_dir = target
        .parent()
        .ok_or_else(|| InstallError::Extract(format!("{} has no parent", target.display())))?;
    fs::create_dir_all(bin_dir)?;

    // Stage next to the target so the final rename stays on one filesystem.
    let mut staged = NamedTempFile::new_in(bin_dir)?;
    let written = extract_executable(&archive, &platform.executable_name(), staged.as_file_mut())?;
    staged.as_file_mut().flush()?;
    debug!("extracted {written} bytes from {}", archive.name);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(staged.path(), fs::Permissions::from_mode(0o755))?;
    }

    staged.persist(target).map_err(|err| InstallError::Io(err.error))?;

    let receipt = InstallReceipt {
        binary: platform.binary_name(),
        version: version.clone(),
        os: platform.os.clone(),
        arch: platform.arch.clone(),
        asset: archive.name.clone(),
        sha256: Some(actual.clone()),
        installed_at: Utc::now(),
    };
    if let Err(err) = save_receipt(target, &receipt) {
        warn!("could not write install receipt: {err:#}");
    }

    info!("installed {} {}", platform.binary_name(), version);
    Ok(InstalledBinary {
        path: target.to_path_buf(),
        version,
        asset: archive.name,
        sha256: actual,
    })
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
