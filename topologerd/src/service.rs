use std::sync::Arc;
use std::time::Instant;
use serde::Serialize;
use shared::types::Hop;
use crate::config::{SystemConfig, TraceConfig};
use crate::error::TraceError;
use crate::geo::GeoLocator;
use crate::ingest::{self, PathTarget};
use crate::store_manager::StoreHandle;
use crate::target::{self, TargetKind};
use crate::trace::{self, runner, ToolCommand};

/// Result of one traceroute request
#[derive(Debug, Clone, Serialize)]
pub struct TraceReport {
    pub target: String,
    pub hops: Vec<Hop>,
    /// Absent when the path could not be stored
    pub path_id: Option<i64>,
}

/// Runs traceroutes and records them in the topology store
#[derive(Clone)]
pub struct TracerouteService {
    store: StoreHandle,
    geo: Arc<dyn GeoLocator>,
    system: Arc<SystemConfig>,
    trace: Arc<TraceConfig>,
}

impl TracerouteService {
    pub fn new(
        store: StoreHandle,
        geo: Arc<dyn GeoLocator>,
        system: SystemConfig,
        trace: TraceConfig,
    ) -> Self {
        Self {
            store,
            geo,
            system: Arc::new(system),
            trace: Arc::new(trace),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn system(&self) -> &SystemConfig {
        &self.system
    }

    /// Validate, run the platform tool, parse and record.
    pub async fn run_traceroute(&self, target: &str) -> Result<TraceReport, TraceError> {
        let started = Instant::now();
        let kind = target::validate(target)?;
        let sanitized = target::sanitize(target);

        tracing::info!("Starting traceroute to {} ({})", sanitized, kind);

        let command = ToolCommand::for_platform(
            std::env::consts::OS,
            kind,
            &sanitized,
            self.trace.wait_secs,
        )?;

        let report = self.execute(&sanitized, kind, &command).await?;
        tracing::info!(
            "Traceroute to {} completed in {} ms",
            sanitized,
            started.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Run a prepared command and record its output. Nothing is stored when
    /// the run itself fails.
    async fn execute(
        &self,
        target: &str,
        kind: TargetKind,
        command: &ToolCommand,
    ) -> Result<TraceReport, TraceError> {
        tracing::debug!("Executing {}", command.display());

        let output = runner::run(command, &self.trace).await.map_err(|e| {
            tracing::error!("Traceroute to {} failed: {}", target, e);
            e
        })?;
        tracing::debug!("Traceroute output received ({} bytes)", output.len());

        Ok(self.record(target, kind, &output).await)
    }

    /// Parse finished tool output and store it. Storage failures are logged
    /// and leave `path_id` empty; the hops are returned regardless.
    pub async fn record(&self, target: &str, kind: TargetKind, output: &str) -> TraceReport {
        let parsed = trace::parse(output);
        if parsed.skipped > 0 {
            tracing::debug!("Skipped {} unparseable lines", parsed.skipped);
        }
        tracing::info!("Parsed {} hops from traceroute to {}", parsed.hops.len(), target);

        let path_target = PathTarget {
            address: target.to_string(),
            hostname: (kind == TargetKind::Domain).then(|| target.to_string()),
        };

        let path_id = match ingest::ingest(
            &self.store,
            self.geo.as_ref(),
            &self.system,
            &path_target,
            &parsed.hops,
        )
        .await
        {
            Ok(summary) => {
                tracing::info!(
                    "Saved path {} for {} ({} routers, {} links, {} private hops skipped)",
                    summary.path_id,
                    target,
                    summary.routers,
                    summary.links,
                    summary.skipped_private
                );
                Some(summary.path_id)
            }
            Err(e) => {
                tracing::error!("Failed to save traceroute to {}: {:#}", target, e);
                None
            }
        };

        TraceReport {
            target: target.to_string(),
            hops: parsed.hops,
            path_id,
        }
    }
}
