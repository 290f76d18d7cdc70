//! `educore events`: Consume graph events from the learning-content stream.
//!
//! Input is newline-delimited JSON, one `{type, tenantId, payload}` object
//! per line. Malformed lines are logged and skipped; a failing event does
//! not stop the stream.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use educore_config::AppConfig;
use educore_core::event::EventBus;
use educore_core::graph::GraphEvent;
use educore_pipeline::KnowledgeGraphManager;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, warn};

use crate::app::{Backends, graph_manager};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct EventStats {
    pub handled: usize,
    pub malformed: usize,
    pub failed: usize,
    /// Tenants named by well-formed events
    pub tenants: BTreeSet<String>,
}

pub async fn consume<R>(graph: &KnowledgeGraphManager, reader: R) -> std::io::Result<EventStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = EventStats::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: GraphEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed graph event");
                stats.malformed += 1;
                continue;
            }
        };

        if let Some(tenant_id) = event.tenant_id.as_ref().filter(|t| !t.is_empty()) {
            stats.tenants.insert(tenant_id.clone());
        }

        match graph.handle_event(event).await {
            Ok(()) => stats.handled += 1,
            Err(e) => {
                error!(line = line_no, error = %e, "Graph event failed");
                stats.failed += 1;
            }
        }
    }

    Ok(stats)
}

pub async fn run(file: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let backends = Backends::connect(&config).await?;
    let graph = graph_manager(&config, backends.graph, Arc::new(EventBus::default()));

    let stats = match file {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
            consume(&graph, BufReader::new(file)).await?
        }
        None => consume(&graph, BufReader::new(tokio::io::stdin())).await?,
    };

    println!(
        "Events handled: {}, malformed: {}, failed: {}",
        stats.handled, stats.malformed, stats.failed
    );

    let max_age = config.graph.max_sync_age();
    for tenant_id in &stats.tenants {
        match graph.get_graph_version(tenant_id) {
            Some(version) => println!(
                "  {tenant_id}: {} at {} ({})",
                version.version,
                version.timestamp.to_rfc3339(),
                if graph.verify_sync_time(tenant_id, max_age) { "fresh" } else { "stale" }
            ),
            None => println!("  {tenant_id}: never synced"),
        }
    }

    if stats.failed > 0 {
        return Err(format!("{} graph events failed", stats.failed).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use educore_store::InMemoryGraphStore;

    #[tokio::test]
    async fn stream_skips_bad_lines_and_applies_the_rest() {
        let store = Arc::new(InMemoryGraphStore::new());
        let graph = KnowledgeGraphManager::new(store.clone());

        let input = concat!(
            r#"{"type":"graph.update","tenantId":"t1","payload":{"nodes":[{"nodeId":"n1"}]}}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"type":"graph.sync","tenantId":"t1","payload":{"nodes":[{"nodeId":"n2"}],"edges":[{"sourceNodeId":"n1","targetNodeId":"n2"}],"version":"v3"}}"#,
            "\n",
            r#"{"type":"graph.rebuild","tenantId":"t1","payload":{"nodes":[{"nodeId":"n3"}]}}"#,
            "\n",
        );

        let stats = consume(&graph, input.as_bytes()).await.unwrap();
        assert_eq!(stats.handled, 3);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.tenants.len(), 1);
        assert_eq!(store.node_count("t1").await, 2);
        assert_eq!(store.edge_count("t1").await, 1);
        assert_eq!(graph.get_graph_version("t1").unwrap().version, "v3");
    }
}
