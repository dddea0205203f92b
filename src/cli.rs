use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use clap::{ArgAction, Command, CommandFactory, Parser};
use env_logger::Env;
use log::error;

use crate::config::{ConfigError, DEFAULT_GITHUB_API, LauncherConfig, Repository};
use crate::launcher::{LaunchError, Launcher};
use crate::platform::{Platform, detect_environment};
use crate::release::GithubReleases;

/// Exit code for configuration problems (sysexits EX_CONFIG).
pub const EXIT_CONFIG: i32 = 78;
pub const EXIT_FAILURE: i32 = 1;

/// Prefix reserved for the launcher's own flags.
pub const LAUNCHER_FLAG_PREFIX: &str = "--launcher-";

#[derive(Debug, Parser)]
#[command(
    name = "nitro-launcher",
    version,
    about = "Runs the platform nitro binary, installing it on first use",
    disable_help_flag = true,
    disable_version_flag = true,
    after_help = "Only leading --launcher-* flags are read by the launcher. Every other argument, from the first one onward, is passed to nitro unchanged."
)]
pub struct Cli {
    /// Directory whose `bin/` holds the platform binaries
    #[arg(long = "launcher-vendor-root", env = "NITRO_VENDOR_ROOT", value_name = "PATH")]
    vendor_root: Option<PathBuf>,
    /// Install this release tag instead of the latest one
    #[arg(long = "launcher-release", env = "NITRO_RELEASE", value_name = "TAG")]
    release: Option<String>,
    /// Expected SHA-256 of the release archive
    #[arg(long = "launcher-sha256", env = "NITRO_SHA256", value_name = "HEX")]
    sha256: Option<String>,
    /// Fail instead of downloading a missing binary
    #[arg(long = "launcher-no-install")]
    no_install: bool,
    /// Base URL of the GitHub API
    #[arg(
        long = "launcher-github-api",
        env = "NITRO_GITHUB_API",
        default_value = DEFAULT_GITHUB_API
    )]
    github_api: String,
    /// Repository publishing the releases, as owner/repo
    #[arg(
        long = "launcher-github-repo",
        env = "NITRO_GITHUB_REPO",
        default_value = "craftcms/nitro"
    )]
    github_repo: String,
    /// Print the detected environment as JSON and exit
    #[arg(long = "launcher-detect")]
    detect: bool,
    /// Emit compact JSON instead of pretty output
    #[arg(long = "launcher-raw", requires = "detect")]
    raw: bool,
    /// Log debug output to stderr
    #[arg(long = "launcher-verbose")]
    verbose: bool,
    /// Print launcher help
    #[arg(long = "launcher-help", action = ArgAction::Help)]
    help: Option<bool>,
    /// Print launcher version
    #[arg(long = "launcher-version", action = ArgAction::Version)]
    version: Option<bool>,
}

impl Cli {
    fn launcher_config(&self) -> Result<LauncherConfig, ConfigError> {
        let repository = Repository {
            api_base: self.github_api.clone(),
            ..Repository::from_slug(&self.github_repo)?
        };

        Ok(LauncherConfig {
            vendor_root: self.vendor_root.clone(),
            release: self.release.clone(),
            expected_sha256: self.sha256.clone(),
            allow_install: !self.no_install,
            repository,
            ..LauncherConfig::default()
        })
    }
}

/// Split `argv` into the launcher's part (program name plus leading
/// `--launcher-*` flags and their values) and the arguments for nitro.
///
/// The second half is returned untouched, `--` included.
pub fn split_args<I>(argv: I) -> (Vec<OsString>, Vec<OsString>)
where
    I: IntoIterator<Item = OsString>,
{
    let command = Cli::command();
    let mut argv = argv.into_iter();
    let mut launcher: Vec<OsString> = argv.next().into_iter().collect();
    let mut rest = argv.peekable();

    while let Some(takes_value) = rest.peek().and_then(|arg| launcher_flag(&command, arg)) {
        launcher.extend(rest.next());
        if takes_value {
            launcher.extend(rest.next());
        }
    }

    (launcher, rest.collect())
}

/// `Some(takes_separate_value)` when `arg` is a launcher flag.
fn launcher_flag(command: &Command, arg: &OsStr) -> Option<bool> {
    let flag = arg.to_str()?.strip_prefix(LAUNCHER_FLAG_PREFIX)?;
    if flag.contains('=') {
        return Some(false);
    }

    let long = format!("launcher-{flag}");
    let takes_value = command
        .get_arguments()
        .find(|a| a.get_long() == Some(long.as_str()))
        .is_some_and(|a| a.get_action().takes_values());
    Some(takes_value)
}

pub fn run() -> i32 {
    let (launcher_args, forwarded) = split_args(std::env::args_os());
    run_with(Cli::parse_from(launcher_args), forwarded)
}

fn run_with(cli: Cli, forwarded: Vec<OsString>) -> i32 {
    let level = if cli.verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(level)).try_init();

    if cli.detect {
        return match print_environment(cli.raw) {
            Ok(()) => 0,
            Err(err) => {
                error!("{err:#}");
                EXIT_FAILURE
            }
        };
    }

    let config = match cli.launcher_config() {
        Ok(config) => config,
        Err(err) => return report(&LaunchError::Config(err)),
    };
    let source = GithubReleases::new(config.repository.clone());
    let launcher = Launcher::new(config, Platform::detect(), source);

    match launcher.resolve_and_run(forwarded) {
        Ok(outcome) => outcome.code,
        Err(err) => report(&err),
    }
}

fn print_environment(raw: bool) -> anyhow::Result<()> {
    let env = detect_environment();
    if raw {
        println!("{}", serde_json::to_string(&env)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&env)?);
    }
    Ok(())
}

fn report(err: &LaunchError) -> i32 {
    eprintln!("nitro-launcher: {err}");
    exit_code(err)
}

pub fn exit_code(err: &LaunchError) -> i32 {
    match err {
        LaunchError::Config(_) => EXIT_CONFIG,
        LaunchError::Install(_) | LaunchError::NotInstalled(_) | LaunchError::Spawn { .. } => {
            EXIT_FAILURE
        }
    }
}
