//! `educore query`: Answer a tenant query through the pipeline.

use std::collections::HashMap;

use educore_config::AppConfig;
use educore_core::query::QueryRequest;
use educore_pipeline::QueryService;

use crate::app::App;

pub struct QueryArgs {
    pub tenant: String,
    pub query: String,
    pub user: Option<String>,
    pub session: Option<String>,
    pub roles: Vec<String>,
    pub attributes: HashMap<String, String>,
    pub top_k: Option<usize>,
    pub use_cache: bool,
}

/// Parse a `key=value` attribute filter.
pub fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got \"{raw}\"")),
    }
}

pub fn build_request(args: QueryArgs, default_top_k: usize) -> QueryRequest {
    let mut request = QueryRequest::new(args.tenant, args.query)
        .with_roles(args.roles)
        .with_attributes(args.attributes)
        .with_top_k(args.top_k.unwrap_or(default_top_k))
        .with_cache(args.use_cache);
    if let Some(user) = args.user {
        request = request.with_user(user);
    }
    if let Some(session) = args.session {
        request = request.with_session(session);
    }
    request
}

pub async fn run(args: QueryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let app = App::build(&config).await?;

    let request = build_request(args, config.query.default_top_k);
    let response = app
        .pipeline
        .process_query(request)
        .await
        .map_err(|e| e.public_message())?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
