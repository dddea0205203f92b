use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

/// Record of the release an installed binary came from.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InstallReceipt {
    pub binary: String,
    pub version: String,
    pub os: String,
    pub arch: String,
    pub asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub installed_at: DateTime<Utc>,
}

/// Receipt path for the binary at `binary_path`.
pub fn receipt_path(binary_path: &Path) -> PathBuf {
    let mut name = binary_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".json");
    binary_path.with_file_name(name)
}

pub fn load_receipt(binary_path: &Path) -> anyhow::Result<Option<InstallReceipt>> {
    let path = receipt_path(binary_path);
    if !path.exists() {
        return Ok(None);
    }

    let data = fs::read_to_string(&path)
        .with_context(|| format!("reading install receipt at {}", path.display()))?;
    let receipt = serde_json::from_str(&data)
        .with_context(|| format!("parsing install receipt at {}", path.display()))?;
    Ok(Some(receipt))
}

pub fn save_receipt(binary_path: &Path, receipt: &InstallReceipt) -> anyhow::Result<()> {
    let path = receipt_path(binary_path);
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("receipt path {} has no parent", path.display()))?;

    let mut staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp receipt in {}", dir.display()))?;
    serde_json::to_writer_pretty(staged.as_file_mut(), receipt)
        .with_context(|| format!("writing temp receipt {}", staged.path().display()))?;
    staged
        .persist(&path)
        .map_err(|err| err.error)
        .with_context(|| format!("committing receipt to {}", path.display()))?;
    Ok(())
}
