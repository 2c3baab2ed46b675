//! `procloom check`: validate the configuration.

use procloom_config::RuntimeConfig;
use procloom_engine::ProcessFactory;
use procloom_providers::build_from_config;
use std::path::Path;

pub async fn run(config_path: &Path, ping: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 procloom check");
    println!();

    if config_path.exists() {
        println!("  ✅ Config file: {}", config_path.display());
    } else {
        println!("  ⚠️  Config file: {} not found, using defaults", config_path.display());
    }

    let config = match RuntimeConfig::load_at(config_path) {
        Ok(config) => {
            println!("  ✅ Configuration is valid");
            config
        }
        Err(e) => {
            println!("  ❌ {e}");
            return Err(e.into());
        }
    };

    let mut issues = 0;
    for (name, backend) in &config.backends {
        if backend.api_key.is_some() {
            println!("  ✅ Backend {name}: {} (API key set)", backend.api_url);
        } else {
            println!("  ⚠️  Backend {name}: {} (no API key)", backend.api_url);
            issues += 1;
        }
    }

    let router = build_from_config(&config);
    let factory = match ProcessFactory::from_config(config) {
        Ok(factory) => factory,
        Err(e) => {
            println!("  ❌ {e}");
            return Err(e.into());
        }
    };
    for name in factory.programs() {
        let tools = factory.tools(name).map(|t| t.len()).unwrap_or(0);
        println!("  ✅ Program {name}: {tools} tools");
    }

    if ping {
        for name in router.list() {
            let Some(backend) = router.get(name) else {
                continue;
            };
            match backend.health_check().await {
                Ok(true) => println!("  ✅ Backend {name} is reachable"),
                Ok(false) => {
                    println!("  ⚠️  Backend {name} answered but reported unhealthy");
                    issues += 1;
                }
                Err(e) => {
                    println!("  ❌ Backend {name}: {e}");
                    issues += 1;
                }
            }
        }
    }

    println!();
    if issues == 0 {
        println!("  All good.");
    } else {
        println!("  {issues} warning(s).");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_pass_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        run(&dir.path().join("procloom.toml"), false).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_tool_fails_the_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procloom.toml");
        std::fs::write(
            &path,
            r#"
            default_program = "main"
            [programs.main]
            tools = ["teleport"]
            "#,
        )
        .unwrap();

        let err = run(&path, false).await.unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }
}
