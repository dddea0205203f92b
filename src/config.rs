use std::path::{Path, PathBuf};

use thiserror::Error;

pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
pub const DEFAULT_OWNER: &str = "craftcms";
pub const DEFAULT_REPO: &str = "nitro";

/// Release-hosting repository the launcher installs from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
}

impl Default for Repository {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_GITHUB_API.to_string(),
            owner: DEFAULT_OWNER.to_string(),
            repo: DEFAULT_REPO.to_string(),
        }
    }
}

impl Repository {
    /// Parse an `owner/repo` pair, keeping the default API base.
    pub fn from_slug(slug: &str) -> Result<Self, ConfigError> {
        match slug.trim().split_once('/') {
            Some((owner, repo))
                if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') =>
            {
                Ok(Self {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    ..Self::default()
                })
            }
            _ => Err(ConfigError::InvalidRepository(slug.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub vendor_root: Option<PathBuf>,
    pub pointer_width: u32,
    pub release: Option<String>,
    pub expected_sha256: Option<String>,
    pub allow_install: bool,
    pub repository: Repository,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            vendor_root: None,
            pointer_width: usize::BITS,
            release: None,
            expected_sha256: None,
            allow_install: true,
            repository: Repository::default(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("nitro requires a 64-bit runtime, found {0}-bit")]
    UnsupportedPointerWidth(u32),
    #[error("vendor root is not configured (set NITRO_VENDOR_ROOT or pass --launcher-vendor-root)")]
    MissingVendorRoot,
    #[error("vendor root must be an absolute path, got {}", .0.display())]
    RelativeVendorRoot(PathBuf),
    #[error("expected SHA-256 digest must be 64 hex characters, got '{0}'")]
    InvalidChecksum(String),
    #[error("repository must look like 'owner/repo', got '{0}'")]
    InvalidRepository(String),
}

impl LauncherConfig {
    pub fn with_vendor_root(vendor_root: impl Into<PathBuf>) -> Self {
        Self {
            vendor_root: Some(vendor_root.into()),
            ..Self::default()
        }
    }

    /// Check startup preconditions and return the vendor root.
    ///
    /// Nothing here touches the filesystem; a failing check must abort
    /// before the launcher looks for the binary.
    pub fn validate(&self) -> Result<&Path, ConfigError> {
        if self.pointer_width != 64 {
            return Err(ConfigError::UnsupportedPointerWidth(self.pointer_width));
        }

        let root = match self.vendor_root.as_deref() {
            Some(root) if !root.as_os_str().is_empty() => root,
            _ => return Err(ConfigError::MissingVendorRoot),
        };

        if !root.is_absolute() {
            return Err(ConfigError::RelativeVendorRoot(root.to_path_buf()));
        }

        if let Some(digest) = &self.expected_sha256 {
            if !is_sha256_hex(digest) {
                return Err(ConfigError::InvalidChecksum(digest.clone()));
            }
        }

        Ok(root)
    }

    /// Directory holding the platform binaries.
    pub fn bin_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.validate()?.join("bin"))
    }
}

pub fn is_sha256_hex(raw: &str) -> bool {
    raw.len() == 64 && raw.chars().all(|c| c.is_ascii_hexdigit())
}
