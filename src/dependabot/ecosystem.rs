/// Map between the task's public package-ecosystem names and the update
/// tool's internal package-manager identifiers. Unrecognised ecosystems pass
/// through unchanged.
pub fn ecosystem_to_package_manager(package_ecosystem: &str) -> String {
    match package_ecosystem.to_lowercase().as_str() {
        "devcontainer" => "devcontainers",
        "github-actions" => "github_actions",
        "gitsubmodule" => "submodules",
        "gomod" => "go_modules",
        "mix" => "hex",
        "npm" => "npm_and_yarn",
        // Additional aliases, for convenience
        "pipenv" => "pip",
        "pip-compile" => "pip",
        "poetry" => "pip",
        "pnpm" => "npm_and_yarn",
        "yarn" => "npm_and_yarn",
        _ => return package_ecosystem.to_string(),
    }
    .to_string()
}
