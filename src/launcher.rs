use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};

use log::debug;
use thiserror::Error;

use crate::config::{ConfigError, LauncherConfig};
use crate::installer::{InstallError, InstallOptions, install_binary};
use crate::platform::Platform;
use crate::release::ReleaseSource;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("installing nitro failed: {0}")]
    Install(#[from] InstallError),
    #[error("{} is not installed and installation is disabled", .0.display())]
    NotInstalled(PathBuf),
    #[error("could not run {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Present(PathBuf),
    Missing(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: i32,
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self { code };
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Self { code: 128 + signal };
            }
        }

        Self { code: 1 }
    }
}

/// Finds the platform binary under the vendor root, installs it when
/// missing and hands the process over to it.
pub struct Launcher<S> {
    config: LauncherConfig,
    platform: Platform,
    source: S,
}

impl<S: ReleaseSource> Launcher<S> {
    pub fn new(config: LauncherConfig, platform: Platform, source: S) -> Self {
        Self {
            config,
            platform,
            source,
        }
    }

    /// Expected binary location, `<vendor-root>/bin/nitro-<os>-<arch>`.
    pub fn binary_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.config.bin_dir()?.join(self.platform.binary_name()))
    }

    pub fn resolve(&self) -> Result<Resolution, LaunchError> {
        let path = self.binary_path()?;
        let resolution = if path.is_file() {
            Resolution::Present(path)
        } else {
            Resolution::Missing(path)
        };
        debug!("resolved {resolution:?}");
        Ok(resolution)
    }

    /// Make sure the binary exists, installing it if allowed.
    pub fn ensure_installed(&self) -> Result<PathBuf, LaunchError> {
        match self.resolve()? {
            Resolution::Present(path) => Ok(path),
            Resolution::Missing(path) if !self.config.allow_install => {
                Err(LaunchError::NotInstalled(path))
            }
            Resolution::Missing(path) => {
                let options = InstallOptions {
                    release: self.config.release.clone(),
                    expected_sha256: self.config.expected_sha256.clone(),
                };
                let installed = install_binary(&self.source, &self.platform, &path, &options)?;
                Ok(installed.path)
            }
        }
    }

    pub fn resolve_and_run<I>(&self, args: I) -> Result<ExitOutcome, LaunchError>
    where
        I: IntoIterator<Item = OsString>,
    {
        let path = self.ensure_installed()?;
        let args: Vec<OsString> = args.into_iter().collect();
        debug!("delegating to {} with {} argument(s)", path.display(), args.len());

        let status = Command::new(&path)
            .args(&args)
            .status()
            .map_err(|source| LaunchError::Spawn {
                path: path.clone(),
                source,
            })?;

        Ok(ExitOutcome::from_status(status))
    }
}
