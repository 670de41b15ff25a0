//! Init command - write a default configuration file.

use std::path::Path;

use chunkfetch::config::ConfigFile;

use crate::error::CliError;

/// Run the init command.
pub fn run(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        println!("Configuration file already exists: {}", path.display());
        println!("Use --force to overwrite it with defaults.");
        return Ok(());
    }

    ConfigFile::default().save_to(path)?;

    println!("Configuration file: {}", path.display());
    println!();
    println!("Add your storage tier endpoints under [tiers], for example:");
    println!("  1 = https://dc1.example.net, https://dc1-mirror.example.net");
    Ok(())
}
