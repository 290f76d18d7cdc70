//! `educore config`: Configuration management commands.

use educore_config::AppConfig;

/// Settings that load fine but leave the CLI with little to work with.
pub fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set EDUCORE_API_KEY or OPENAI_API_KEY)");
    }
    if config.database.url.is_none() {
        warnings.push("No database.url; similarity search has no content to search");
    }
    if config.cache.backend == "memory" || config.graph.store == "memory" {
        warnings.push(
            "Memory backends last one process; every CLI run starts with an empty cache and graph",
        );
    }
    if config.retrieval.allow_unfiltered {
        warnings.push("retrieval.allow_unfiltered is on; diagnostic queries bypass the threshold");
    }
    warnings
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   Config parsed and validated");

            for w in warnings(&config) {
                println!("   warning: {w}");
            }

            println!();
            println!("   Cache:  {}", config.cache.backend);
            println!("   Graph:  {}", config.graph.store);
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.provider.api_key.is_some() {
        config.provider.api_key = Some("***".into());
    }
    if config.database.url.is_some() {
        config.database.url = Some("***".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Created config.toml at: {}", config_path.display());
    println!("Next: set provider.api_key (or EDUCORE_API_KEY) and the signal service URLs.");
    Ok(())
}
