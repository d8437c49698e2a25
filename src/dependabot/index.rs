use super::events::DependencySet;
use crate::azure::types::{
    PullRequestProperties, PR_PROPERTY_DEPENDENCIES, PR_PROPERTY_PACKAGE_MANAGER,
};
use std::collections::HashSet;
use tracing::debug;

/// In-memory index over the previously fetched set of open pull requests,
/// keyed by (package-manager, dependency-name-set).
///
/// Built once per run from the static snapshot and never mutated during the
/// run: a pull request created by an earlier event in the same run does not
/// appear in lookups for later events, which is intentional: one run issues
/// at most one mutation per logical dependency set.
#[derive(Debug, Clone, Default)]
pub struct PullRequestIndex {
    pull_requests: Vec<PullRequestProperties>,
}

impl PullRequestIndex {
    pub fn new(pull_requests: Vec<PullRequestProperties>) -> Self {
        Self { pull_requests }
    }

    /// Number of open pull requests in the pre-run snapshot
    pub fn len(&self) -> usize {
        self.pull_requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pull_requests.is_empty()
    }

    /// Find the pull request whose stored identity matches the given package
    /// manager and dependency-name set exactly (same members, any order).
    /// Partial overlap is not a match: a grouped update's member set must
    /// match exactly to avoid reusing a pull request from a different
    /// grouping. If more than one snapshot entry matches, the first wins.
    pub fn find(
        &self,
        package_manager: &str,
        dependency_names: &[String],
    ) -> Option<&PullRequestProperties> {
        let wanted: HashSet<&str> = dependency_names.iter().map(String::as_str).collect();
        let mut matches = self.pull_requests.iter().filter(|pr| {
            pr.property(PR_PROPERTY_PACKAGE_MANAGER) == Some(package_manager)
                && pr
                    .property(PR_PROPERTY_DEPENDENCIES)
                    .and_then(|value| serde_json::from_str::<DependencySet>(value).ok())
                    .is_some_and(|set| {
                        let stored = set.dependency_names();
                        stored.len() == dependency_names.len()
                            && stored.iter().all(|name| wanted.contains(name))
                    })
        });
        let found = matches.next();
        if let (Some(first), Some(second)) = (found, matches.next()) {
            debug!(
                package_manager,
                first = first.id,
                second = second.id,
                "multiple pull requests match the same dependency identity; using the first"
            );
        }
        found
    }
}
