//! Cache-key command - show where an object lives in the local cache.

use chunkfetch::cache::DiskCache;
use chunkfetch::config::ConfigFile;

use super::common::LocatorArgs;
use crate::error::CliError;

/// Run the cache-key command.
pub fn run(args: &LocatorArgs, config: &ConfigFile) -> Result<(), CliError> {
    let locator = args.to_locator()?;
    let key = locator.cache_key();

    println!("Object:    {}", locator);
    println!("Cache key: {}", key);

    if let Some(directory) = &config.cache.directory {
        let path = DiskCache::new(directory).path_for(&key);
        let state = if path.is_file() { "present" } else { "absent" };
        println!("Disk file: {} ({})", path.display(), state);
    }
    Ok(())
}
