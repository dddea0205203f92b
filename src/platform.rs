use serde::Serialize;
use sysinfo::System;

pub const BINARY_PREFIX: &str = "nitro";
pub const DEFAULT_ARCH: &str = "amd64";

/// Operating system and CPU architecture a binary is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    /// Platform for `os_name` with the default `amd64` tag.
    pub fn new(os_name: &str) -> Self {
        Self::from_os_name(os_name, DEFAULT_ARCH)
    }

    pub fn from_os_name(os_name: &str, arch: &str) -> Self {
        Self {
            os: normalize_os(os_name),
            arch: arch.to_lowercase(),
        }
    }

    pub fn detect() -> Self {
        Self {
            os: normalize_os(std::env::consts::OS),
            arch: normalize_arch(std::env::consts::ARCH),
        }
    }

    /// Platform-qualified artifact name, e.g. `nitro-linux-amd64`.
    pub fn binary_name(&self) -> String {
        format!("{BINARY_PREFIX}-{}-{}", self.os, self.arch)
    }

    /// True for Rust's `windows` and the NT-style names other runtimes report.
    pub fn is_windows(&self) -> bool {
        matches!(
            self.os.as_str(),
            "windows" | "winnt" | "win32" | "windows_nt"
        )
    }

    /// OS spelling used in release asset names.
    pub fn asset_os(&self) -> &str {
        if self.is_windows() {
            "windows"
        } else {
            &self.os
        }
    }

    /// File name of the executable inside a release archive.
    pub fn executable_name(&self) -> String {
        if self.is_windows() {
            format!("{BINARY_PREFIX}.exe")
        } else {
            BINARY_PREFIX.to_string()
        }
    }

    /// Spellings a release asset may use for this architecture.
    pub fn asset_arch_aliases(&self) -> Vec<&str> {
        match self.arch.as_str() {
            "amd64" => vec!["amd64", "x86_64"],
            "arm64" => vec!["arm64", "aarch64"],
            other => vec![other],
        }
    }
}

fn normalize_os(raw: &str) -> String {
    match raw {
        "macos" => "darwin".to_string(),
        other => other.to_lowercase(),
    }
}

fn normalize_arch(raw: &str) -> String {
    match raw {
        "x86_64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        other => other.to_lowercase(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Environment {
    pub os: String,
    pub os_version: String,
    pub cpu_arch: String,
    pub ram_gb: u64,
    pub pointer_width: u32,
    pub binary_name: String,
}

pub fn detect_environment() -> Environment {
    let mut system = System::new();
    system.refresh_memory();

    let platform = Platform::detect();
    let os_version = System::long_os_version()
        .or_else(System::os_version)
        .unwrap_or_else(|| "unknown".to_string());
    let ram_gb = system.total_memory() / 1_073_741_824;

    Environment {
        binary_name: platform.binary_name(),
        os: platform.os,
        os_version,
        cpu_arch: platform.arch,
        ram_gb,
        pointer_width: usize::BITS,
    }
}
