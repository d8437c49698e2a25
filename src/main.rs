use anyhow::Result;
use clap::{Parser, Subcommand};
use depbot::azure::client::{AdoClient, PullRequestApi};
use depbot::azure::identity::IdentityResolver;
use depbot::config::DepbotConfig;
use depbot::dependabot::{
    DependabotRunner, JobConfigBuilder, OutputReconciler, PullRequestIndex, ReconcilerSettings,
    UpdateJob,
};
use depbot::telemetry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;

#[derive(Parser)]
#[command(name = "depbot")]
#[command(about = "Dependency update pull request automation for Azure DevOps")]
#[command(
    long_about = "Depbot runs dependabot update jobs against an Azure DevOps repository and \
                  reconciles the results into pull requests: creating, updating and abandoning \
                  them so the open set always mirrors what the updater last reported."
)]
struct Cli {
    /// Path to the configuration file (defaults to ./depbot.yml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all configured update jobs and reconcile their output
    Update {
        /// Only run jobs for this package ecosystem
        #[arg(long, help = "Restrict the run to one package ecosystem, e.g. npm")]
        ecosystem: Option<String>,
    },
    /// List the configured update jobs without running anything
    ListJobs,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_telemetry()?;
    let cli = Cli::parse();
    let config = DepbotConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Update { ecosystem } => update_command(&config, ecosystem.as_deref()).await,
        Commands::ListJobs => list_jobs_command(&config),
    }
}

fn list_jobs_command(config: &DepbotConfig) -> Result<()> {
    if config.updates.is_empty() {
        println!("📭 No update jobs configured");
        return Ok(());
    }
    println!("📋 Configured update jobs:");
    for (index, update) in config.updates.iter().enumerate() {
        let job = UpdateJob::from_config(index, update);
        let location = match (&job.directory, job.directories.is_empty()) {
            (Some(directory), _) => directory.clone(),
            (None, false) => job.directories.join(", "),
            (None, true) => "/".to_string(),
        };
        println!(
            "  {} [{}] in {} (limit {})",
            job.id, job.package_manager, location, job.open_pull_requests_limit
        );
    }
    Ok(())
}

async fn update_command(config: &DepbotConfig, only_ecosystem: Option<&str>) -> Result<()> {
    let token = config.author_token()?;
    let organization_url = config.organization_url();

    let identity = Arc::new(IdentityResolver::new(
        organization_url.clone(),
        token.to_string(),
    ));
    let author_client = Arc::new(AdoClient::new(
        organization_url.clone(),
        token.to_string(),
        identity.clone(),
    ));
    // The approver must be a different identity than the author, since the
    // platform rejects self-approval. Fall back gracefully when no separate
    // token is configured.
    let approver_client: Option<Arc<dyn PullRequestApi>> = match (
        config.behavior.auto_approve,
        config.azure.auto_approve_token.as_deref(),
    ) {
        (true, Some(approve_token)) if !approve_token.is_empty() => {
            let approver_identity = Arc::new(IdentityResolver::new(
                organization_url.clone(),
                approve_token.to_string(),
            ));
            Some(Arc::new(AdoClient::new(
                organization_url,
                approve_token.to_string(),
                approver_identity,
            )))
        }
        _ => None,
    };

    println!(
        "🔍 Fetching open pull requests for {}/{}",
        config.azure.project, config.azure.repository
    );
    let snapshot = author_client
        .get_active_pull_request_properties(&config.azure.project, &config.azure.repository)
        .await?;
    let branch_names = author_client
        .list_branch_names(&config.azure.project, &config.azure.repository)
        .await?;
    println!(
        "📊 Found {} open pull request(s) and {} branch(es)",
        snapshot.len(),
        branch_names.len()
    );

    let run_id = telemetry::generate_run_id();
    tracing::info!(run_id, "starting reconciliation run");

    let settings = ReconcilerSettings::from_config(config);
    let builder = JobConfigBuilder::new(config, token);
    let runner = DependabotRunner::from_config(&config.tool);

    let mut failures = 0usize;
    let mut ran = 0usize;
    for (index, update) in config.updates.iter().enumerate() {
        if let Some(ecosystem) = only_ecosystem {
            if update.package_ecosystem != ecosystem {
                continue;
            }
        }
        ran += 1;
        let job = UpdateJob::from_config(index, update);
        let document = builder.build(&job);
        let reconciler = OutputReconciler::new(
            settings.clone(),
            author_client.clone(),
            approver_client.clone(),
            PullRequestIndex::new(snapshot.clone()),
            branch_names.clone(),
        );

        let span = telemetry::create_update_span("update", &job.id, &job.package_manager);
        let results = runner.run(&document, &job, &reconciler).instrument(span).await?;
        for result in &results {
            match (result.success, &result.error) {
                (true, _) => println!("  ✅ {}", result.kind),
                (false, Some(error)) => {
                    println!("  ❌ {}: {}", result.kind, error);
                    failures += 1;
                }
                (false, None) => {
                    println!("  ⚠️  {} was declined", result.kind);
                    failures += 1;
                }
            }
        }
    }

    if ran == 0 {
        println!("📭 No update jobs matched");
        return Ok(());
    }
    if failures > 0 {
        anyhow::bail!("{failures} output event(s) failed to reconcile");
    }
    println!("🎉 All update jobs reconciled");
    Ok(())
}
