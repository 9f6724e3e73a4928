//! Check command implementation.

use decsync_core::DecsyncError;
use std::path::Path;

/// Runs the check command.
pub fn run(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Checking DecSync directory {}", dir.display());

    match decsync_core::check_decsync_info(dir) {
        Ok(()) => {
            println!("✓ .decsync-info is valid");
            Ok(())
        }
        Err(err @ DecsyncError::InvalidInfo { .. }) => {
            println!("✗ {err}");
            std::process::exit(1);
        }
        Err(err @ DecsyncError::UnsupportedVersion { .. }) => {
            println!("✗ {err}");
            println!("  Another application may have upgraded this directory;");
            println!("  update this tool to read it.");
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}
