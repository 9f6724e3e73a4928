//! Apps command implementation.

use std::path::Path;

/// Runs the apps command.
pub fn run(
    dir: &Path,
    sync_type: &str,
    collection: Option<&str>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (version, apps) = decsync_core::get_active_apps(dir, sync_type, collection)?;

    if format == "json" {
        let output = serde_json::json!({
            "version": version,
            "apps": apps,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Directory version: {version}");
    if apps.is_empty() {
        println!("No applications seen");
        return Ok(());
    }
    for app in apps {
        let last_active = app.last_active.as_deref().unwrap_or("unknown");
        println!("{} (layout v{}, last active {})", app.app_id, app.version, last_active);
    }
    Ok(())
}
