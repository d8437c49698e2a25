use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Initialize tracing with structured logging.
/// Log verbosity is controlled through the standard RUST_LOG environment variable;
/// pipeline agents typically run with RUST_LOG=depbot=debug when troubleshooting.
pub fn init_telemetry() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    Ok(())
}

/// Generate a correlation ID for linking one update run's log records together
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Create a span with common update-job attributes
pub fn create_update_span(operation: &str, job_id: &str, package_manager: &str) -> tracing::Span {
    tracing::info_span!(
        "update_job",
        operation = operation,
        job.id = job_id,
        job.package_manager = package_manager,
    )
}
