//! `aegis config`: Configuration management commands.

use std::path::{Path, PathBuf};

use aegis_config::EngineConfig;

fn config_file(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| EngineConfig::config_dir().join("config.toml"))
}

pub async fn show(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(path).map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn validate(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match super::load_config(path) {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Provider:    {}", config.default_provider);
            println!("   Model:       {}", config.default_model);
            println!("   Window:      {} tokens", config.window_for(&config.default_model));
            println!(
                "   Planning:    {} / reflection {} (max {} retries)",
                on_off(config.agent.planning_enabled),
                on_off(config.agent.reflection_enabled),
                config.agent.max_reflection_retries
            );
            println!(
                "   Delegation:  depth {} / circular check {}",
                config.delegation.max_depth,
                on_off(config.delegation.circular_check)
            );
            println!("   Autonomy:    {:?}", config.autonomy.level);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn path(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_file(path).display());
    Ok(())
}

pub async fn init(path: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let file = config_file(path);
    if file.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", file.display()).into());
    }
    if let Some(parent) = file.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&file, EngineConfig::default_toml()).await?;
    println!("✅ Wrote default configuration to {}", file.display());
    Ok(())
}

/// Settings that are valid but probably not what the user wants.
fn warnings(config: &EngineConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    let provider = config.providers.get(&config.default_provider);
    if provider.and_then(|p| p.api_key.as_ref()).is_none() {
        warnings.push(format!("No API key set for provider '{}'", config.default_provider));
    }
    for name in &config.fallback_chain {
        if !config.providers.contains_key(name) {
            warnings.push(format!("Fallback provider '{name}' has no [providers.{name}] section"));
        }
    }
    if config.agent.reflection_enabled && !config.agent.planning_enabled {
        warnings.push("Reflection only runs on planned answers, but planning is disabled".into());
    }
    if config.window_for(&config.default_model) < 1000 {
        warnings.push("Context window under 1000 tokens leaves little room for history".into());
    }

    warnings
}

fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}
