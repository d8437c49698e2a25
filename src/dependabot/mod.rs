pub mod branch;
pub mod cli;
pub mod dependency_list;
pub mod ecosystem;
pub mod events;
pub mod index;
pub mod job;
pub mod reconciler;

pub use branch::branch_name_for_update;
pub use cli::DependabotRunner;
pub use dependency_list::{merge_dependency_list, parse_dependency_list};
pub use ecosystem::ecosystem_to_package_manager;
pub use events::{DependencySet, ScenarioOutput, UpdateOutput};
pub use index::PullRequestIndex;
pub use job::{JobConfigBuilder, UpdateJob};
pub use reconciler::{OutputReconciler, ReconciliationResult, ReconcilerSettings};
