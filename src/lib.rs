// Depbot Library - Dependency Update Pull Request Automation for Azure DevOps
// This exposes the core components for testing and integration

pub mod azure;
pub mod config;
pub mod dependabot;
pub mod telemetry;

// Re-export key types for easy access
pub use azure::{AdoClient, AdoError, IdentityResolver, PullRequestApi};
pub use config::{DepbotConfig, UpdateConfig};
pub use dependabot::{
    branch_name_for_update, ecosystem_to_package_manager, DependabotRunner, JobConfigBuilder,
    OutputReconciler, PullRequestIndex, ReconciliationResult, ReconcilerSettings, UpdateJob,
    UpdateOutput,
};
pub use telemetry::init_telemetry;
