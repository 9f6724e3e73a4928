//! Collections command implementation.

use std::path::Path;

/// Runs the collections command.
pub fn run(dir: &Path, sync_type: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut collections = decsync_core::list_collections(dir, sync_type)?;
    collections.sort();

    if collections.is_empty() {
        println!("No {sync_type} collections in {}", dir.display());
        return Ok(());
    }
    for collection in collections {
        println!("{collection}");
    }
    Ok(())
}
