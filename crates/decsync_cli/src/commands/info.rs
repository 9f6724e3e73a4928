//! Info command implementation.

use std::path::Path;

/// Runs the info command.
pub fn run(
    dir: &Path,
    sync_type: &str,
    collection: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let info = decsync_core::get_static_info(dir, sync_type, collection)?;

    if info.is_empty() {
        println!("No static info published");
        return Ok(());
    }
    let mut rows: Vec<(String, String)> = info
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    rows.sort();
    for (key, value) in rows {
        println!("{key}: {value}");
    }
    Ok(())
}
