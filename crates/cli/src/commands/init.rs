//! `procloom init`: write a starter config.

use procloom_config::RuntimeConfig;
use std::path::Path;

pub fn run(config_path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if config_path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(config_path, RuntimeConfig::default_toml())?;

    println!("✅ Wrote {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set PROCLOOM_API_KEY (or add api_key under [backends.default])");
    println!("  2. procloom check");
    println!("  3. procloom run -m \"Hello\"");
    Ok(())
}
