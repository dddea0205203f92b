pub mod archive;
pub mod cli;
pub mod config;
pub mod installer;
pub mod launcher;
pub mod platform;
pub mod receipt;
pub mod release;

/// Run the command line interface and return an exit code.
pub fn run_cli() -> i32 {
    cli::run()
}
