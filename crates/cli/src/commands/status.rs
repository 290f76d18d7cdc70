//! `educore status`: Show configured backends and providers.

use educore_config::AppConfig;

fn configured(url: &Option<String>) -> &str {
    if url.is_some() { "configured" } else { "not configured" }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("Educore Status");
    println!("==============");
    println!("  Config dir:    {}", AppConfig::config_dir().display());
    println!("  Provider URL:  {}", config.provider.api_url);
    println!("  Embedding:     {}", config.provider.embedding_model);
    println!("  Completion:    {}", config.provider.completion_model);
    println!("  API key:       {}", if config.has_api_key() { "set" } else { "missing" });
    println!("  Cache:         {} (ttl {}s)", config.cache.backend, config.query.cache_ttl_secs);
    println!("  Graph store:   {}", config.graph.store);
    println!("  Database:      {}", configured(&config.database.url));
    println!("  Threshold:     {}", config.retrieval.similarity_threshold);
    println!("  Retry:         {} attempts", config.retry.max_attempts);

    let p = &config.personalization;
    println!("  Signals:");
    println!("    skills:      {}", configured(&p.skills_url));
    println!("    learner:     {}", configured(&p.learner_url));
    println!("    assessment:  {}", configured(&p.assessment_url));
    println!("    devlab:      {}", configured(&p.devlab_url));

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file; run `educore config init` first");
    }

    Ok(())
}
