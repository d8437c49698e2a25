use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Main configuration structure for depbot.
///
/// Loaded from an optional `depbot.yml` file layered with `DEPBOT_*`
/// environment variables (e.g. `DEPBOT_AZURE__TOKEN`), so credentials never
/// have to live in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DepbotConfig {
    /// Azure DevOps connection settings
    pub azure: AzureConfig,
    /// Commit author identity used for update branches
    #[serde(default)]
    pub author: AuthorConfig,
    /// Pull request handling behaviour
    #[serde(default)]
    pub behavior: BehaviorConfig,
    /// Dependabot CLI invocation settings
    #[serde(default)]
    pub tool: ToolConfig,
    /// GitHub token used by the updater to avoid rate limiting on registry metadata
    #[serde(default)]
    pub github_token: Option<String>,
    /// The configured update jobs, one per (ecosystem, directory/group) unit
    #[serde(default)]
    pub updates: Vec<UpdateConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AzureConfig {
    /// Organisation URL, e.g. https://dev.azure.com/contoso
    pub organization_url: String,
    /// Project name
    pub project: String,
    /// Repository name
    pub repository: String,
    /// Personal access token used to author pull requests (can be set via env var)
    pub token: Option<String>,
    /// Personal access token of the user that approves pull requests, when
    /// auto-approve is enabled and a separate approver identity is wanted
    #[serde(default)]
    pub auto_approve_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorConfig {
    /// Commit author email; defaults to the well-known dependabot identity
    #[serde(default)]
    pub email: Option<String>,
    /// Commit author display name
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BehaviorConfig {
    /// Skip creating/updating pull requests entirely (dry-run style)
    #[serde(default)]
    pub skip_pull_requests: bool,
    /// Comment on pull requests with an explanation when closing them
    #[serde(default)]
    pub comment_pull_requests: bool,
    /// Abandon pull requests that dependabot reports as no longer wanted
    #[serde(default = "default_true")]
    pub abandon_unwanted_pull_requests: bool,
    /// Store the dependency list snapshot in project properties after each run
    #[serde(default)]
    pub store_dependency_list: bool,
    /// Automatically approve created/updated pull requests
    #[serde(default)]
    pub auto_approve: bool,
    /// Set auto-complete on created pull requests
    #[serde(default)]
    pub set_auto_complete: bool,
    /// Merge strategy for auto-complete: noFastForward, squash, rebase, rebaseMerge
    #[serde(default = "default_merge_strategy")]
    pub merge_strategy: String,
    /// Policy configuration ids which auto-complete should not wait for
    #[serde(default)]
    pub auto_complete_ignore_config_ids: Vec<i64>,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            skip_pull_requests: false,
            comment_pull_requests: false,
            abandon_unwanted_pull_requests: true,
            store_dependency_list: false,
            auto_approve: false,
            set_auto_complete: false,
            merge_strategy: default_merge_strategy(),
            auto_complete_ignore_config_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolConfig {
    /// Path to the dependabot CLI binary; resolved from PATH when unset
    #[serde(default)]
    pub binary: Option<String>,
    /// Source provider passed to the CLI
    #[serde(default)]
    pub provider: Option<String>,
    /// Use this local clone instead of fetching the repository again
    #[serde(default)]
    pub local_repository_path: Option<String>,
    /// Updater image override, useful when "latest" is broken
    #[serde(default)]
    pub updater_image: Option<String>,
    /// Proxy image override
    #[serde(default)]
    pub proxy_image: Option<String>,
}

/// One configured update: the (ecosystem, directory-or-group) unit of work
/// handed to the dependabot CLI.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateConfig {
    /// Public package ecosystem name (npm, gomod, pip, ...)
    pub package_ecosystem: String,
    /// Directory containing the manifest files
    #[serde(default)]
    pub directory: Option<String>,
    /// Multiple directories, for ecosystems that support globbing across them
    #[serde(default)]
    pub directories: Vec<String>,
    /// Target branch override; the repository default branch when unset
    #[serde(default)]
    pub target_branch: Option<String>,
    /// Maximum number of open pull requests for this update (0 = unlimited)
    #[serde(default = "default_open_pr_limit")]
    pub open_pull_requests_limit: u32,
    /// Separator used between branch name segments
    #[serde(default)]
    pub branch_name_separator: Option<String>,
    /// Assignees, modelled as required reviewers on the platform
    #[serde(default)]
    pub assignees: Vec<String>,
    /// Optional reviewers
    #[serde(default)]
    pub reviewers: Vec<String>,
    /// Labels added to created pull requests
    #[serde(default)]
    pub labels: Vec<String>,
    /// Work item linked to created pull requests
    #[serde(default)]
    pub milestone: Option<i64>,
}

fn default_true() -> bool {
    true
}

fn default_merge_strategy() -> String {
    "squash".to_string()
}

fn default_open_pr_limit() -> u32 {
    5
}

impl DepbotConfig {
    /// Load configuration from the given file path (if present) layered with
    /// DEPBOT_* environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        } else {
            builder = builder.add_source(File::with_name("depbot").required(false));
        }
        let settings = builder
            .add_source(Environment::with_prefix("DEPBOT").separator("__"))
            .build()
            .context("failed to read configuration")?;

        let config: DepbotConfig = settings
            .try_deserialize()
            .context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.azure.organization_url).with_context(|| {
            format!(
                "azure.organization_url '{}' is not a valid URL",
                self.azure.organization_url
            )
        })?;
        if self.azure.project.is_empty() || self.azure.repository.is_empty() {
            anyhow::bail!("azure.project and azure.repository must be set");
        }
        Ok(())
    }

    /// The organisation URL as a parsed URL. Only valid after `load`.
    pub fn organization_url(&self) -> Url {
        // validate() has already checked this parses
        Url::parse(&self.azure.organization_url).expect("organization_url was validated at load")
    }

    /// The PAT used to author pull requests.
    pub fn author_token(&self) -> Result<&str> {
        self.azure
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .context("no Azure DevOps token configured; set DEPBOT_AZURE__TOKEN")
    }
}
