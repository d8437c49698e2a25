use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

/// Merge one run's reported dependency list into the stored project-property
/// document, shaped `{repository: {package-manager: {...}}}`.
///
/// The document is always round-tripped whole (parse, merge, serialize) so
/// that entries for other repositories and package managers are preserved;
/// partial-key patches against the property store would clobber them.
pub fn merge_dependency_list(
    existing: &str,
    repository: &str,
    package_manager: &str,
    dependencies: &Value,
    dependency_files: &Value,
    now: DateTime<Utc>,
) -> String {
    let mut document: Map<String, Value> = serde_json::from_str(existing).unwrap_or_default();
    let repo_entry = document
        .entry(repository.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !repo_entry.is_object() {
        *repo_entry = Value::Object(Map::new());
    }
    repo_entry[package_manager] = json!({
        "dependencies": dependencies,
        "dependency-files": dependency_files,
        "last-updated": now.to_rfc3339_opts(SecondsFormat::Millis, true),
    });
    Value::Object(document).to_string()
}

/// Read back the stored snapshot for one (repository, package-manager) pair.
pub fn parse_dependency_list(
    document: &str,
    repository: &str,
    package_manager: &str,
) -> Option<Value> {
    let document: Value = serde_json::from_str(document).ok()?;
    document.get(repository)?.get(package_manager).cloned()
}
