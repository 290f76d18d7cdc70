//! `educore personalized`: Answer with the learner's context attached.

use educore_config::AppConfig;

use crate::app::App;

pub async fn run(
    tenant: &str,
    user: &str,
    query: &str,
    session: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let app = App::build(&config).await?;

    let response = app
        .aggregator
        .get_personalized_query(tenant, user, query, session)
        .await
        .map_err(|e| e.public_message())?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
