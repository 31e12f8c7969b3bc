#![forbid(unsafe_code)]

//! **remediation-cli** – Command-line front end for the remediation core.
//!
//! `serve` boots the worker pool and runs until interrupted. The remaining
//! subcommands are one-shot: each bootstraps its own [`Runtime`] against the
//! configured storage backend, so they are only useful against a durable
//! backend (`--storage sqlite`) shared with a running `serve` process, or
//! standalone against the in-memory backend for quick inspection.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use remediation_approval::{PendingFilter, Verdict};
use remediation_runtime::config::{self, RemediationConfig};
use remediation_runtime::Runtime;
use remediation_store_core::IssueFilter;
use remediation_types::{ActionId, IssueId, MerchantKey, ResolutionKind, Severity, SignalSource, Stage};

#[derive(Parser)]
#[command(name = "remediation")]
#[command(about = "Remediation core: event-driven issue lifecycle engine")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file layered over the built-in
    /// defaults, itself overridable by `REMEDIATION_*` environment
    /// variables.
    #[arg(long, env = "REMEDIATION_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error), overridden by `RUST_LOG`.
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the worker pool and run until interrupted.
    Serve,
    /// Submit a signal and immediately drain the bus against it.
    SubmitSignal {
        /// Merchant the signal concerns.
        #[arg(long)]
        merchant: String,
        /// Signal origin: support_ticket, api_failure, checkout_error, webhook_failure.
        #[arg(long)]
        source: String,
        /// Severity: low, medium, high, critical.
        #[arg(long, default_value = "medium")]
        severity: String,
        /// Machine error code, e.g. WEBHOOK_404.
        #[arg(long)]
        error_code: Option<String>,
        /// Human-readable error message.
        #[arg(long)]
        error_message: Option<String>,
    },
    /// Record an operator's verdict on a pending approval.
    Decide {
        /// Action awaiting approval.
        #[arg(long)]
        action_id: uuid::Uuid,
        /// Operator recording the verdict.
        #[arg(long)]
        operator: String,
        /// approve or reject.
        #[arg(long)]
        verdict: String,
        /// Optional free-text rationale.
        #[arg(long)]
        feedback: Option<String>,
    },
    /// List approvals currently awaiting an operator verdict.
    PendingApprovals {
        /// Narrow the list to one issue.
        #[arg(long)]
        issue_id: Option<uuid::Uuid>,
    },
    /// Fetch one issue by id.
    GetIssue {
        /// Issue to fetch.
        issue_id: uuid::Uuid,
    },
    /// List issues, optionally filtered by merchant, stage, or resolution.
    ListIssues {
        /// Narrow to one merchant.
        #[arg(long)]
        merchant: Option<String>,
        /// Narrow to one stage, e.g. wait_approval.
        #[arg(long)]
        stage: Option<String>,
        /// Narrow to one resolution, e.g. resolved.
        #[arg(long)]
        resolution: Option<String>,
    },
    /// Verify the audit hash chain of one issue.
    VerifyChain {
        /// Issue whose audit log should be verified.
        issue_id: uuid::Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    remediation_runtime::logging::init(&cli.log_level)
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;

    let cfg = config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Serve => run_serve(cfg).await,
        Commands::SubmitSignal {
            merchant,
            source,
            severity,
            error_code,
            error_message,
        } => run_submit_signal(cfg, merchant, source, severity, error_code, error_message).await,
        Commands::Decide {
            action_id,
            operator,
            verdict,
            feedback,
        } => run_decide(cfg, action_id, operator, verdict, feedback).await,
        Commands::PendingApprovals { issue_id } => run_pending_approvals(cfg, issue_id).await,
        Commands::GetIssue { issue_id } => run_get_issue(cfg, issue_id).await,
        Commands::ListIssues {
            merchant,
            stage,
            resolution,
        } => run_list_issues(cfg, merchant, stage, resolution).await,
        Commands::VerifyChain { issue_id } => run_verify_chain(cfg, issue_id).await,
    }
}

async fn run_serve(cfg: RemediationConfig) -> Result<()> {
    let runtime = Runtime::bootstrap(cfg).await?;
    info!("remediation serve starting");
    runtime.run(shutdown_signal()).await?;
    info!("remediation serve stopped");
    Ok(())
}

async fn run_submit_signal(
    cfg: RemediationConfig,
    merchant: String,
    source: String,
    severity: String,
    error_code: Option<String>,
    error_message: Option<String>,
) -> Result<()> {
    let signal = remediation_types::Signal {
        id: remediation_types::SignalId::new(),
        received_at: chrono::Utc::now(),
        source: parse_source(&source)?,
        merchant: MerchantKey::from(merchant),
        severity: parse_severity(&severity)?,
        migration_stage: None,
        error_message,
        error_code,
        resource: None,
        raw_payload: Default::default(),
        context: Default::default(),
        issue_id: None,
    };

    let runtime = Runtime::bootstrap(cfg).await?;
    runtime.submit_signal(signal);
    let processed = runtime.drain_once().await?;
    println!("processed {processed} message(s)");

    let issues = runtime.list_issues(&IssueFilter::default()).await?;
    for issue in issues {
        println!("{}", serde_json::to_string_pretty(&issue)?);
    }
    Ok(())
}

async fn run_decide(
    cfg: RemediationConfig,
    action_id: uuid::Uuid,
    operator: String,
    verdict: String,
    feedback: Option<String>,
) -> Result<()> {
    let verdict = match verdict.to_lowercase().as_str() {
        "approve" => Verdict::Approve,
        "reject" => Verdict::Reject,
        other => bail!("unknown verdict '{other}', expected 'approve' or 'reject'"),
    };

    let runtime = Runtime::bootstrap(cfg).await?;
    let decision = runtime
        .decide(ActionId::from(action_id), operator, verdict, feedback)
        .await?;
    println!("{decision:#?}");
    Ok(())
}

async fn run_pending_approvals(cfg: RemediationConfig, issue_id: Option<uuid::Uuid>) -> Result<()> {
    let runtime = Runtime::bootstrap(cfg).await?;
    let filter = PendingFilter {
        issue_id: issue_id.map(IssueId::from),
    };
    let pending = runtime.list_pending_approvals(&filter).await;
    println!("{pending:#?}");
    Ok(())
}

async fn run_get_issue(cfg: RemediationConfig, issue_id: uuid::Uuid) -> Result<()> {
    let runtime = Runtime::bootstrap(cfg).await?;
    match runtime.get_issue(IssueId::from(issue_id)).await? {
        Some(issue) => println!("{}", serde_json::to_string_pretty(&issue)?),
        None => bail!("no issue found with id {issue_id}"),
    }
    Ok(())
}

async fn run_list_issues(
    cfg: RemediationConfig,
    merchant: Option<String>,
    stage: Option<String>,
    resolution: Option<String>,
) -> Result<()> {
    let filter = IssueFilter {
        merchant: merchant.map(MerchantKey::from),
        stage: stage.as_deref().map(parse_stage).transpose()?,
        resolution: resolution.as_deref().map(parse_resolution).transpose()?,
    };

    let runtime = Runtime::bootstrap(cfg).await?;
    let issues = runtime.list_issues(&filter).await?;
    println!("{}", serde_json::to_string_pretty(&issues)?);
    Ok(())
}

async fn run_verify_chain(cfg: RemediationConfig, issue_id: uuid::Uuid) -> Result<()> {
    let runtime = Runtime::bootstrap(cfg).await?;
    let result = runtime.verify_chain(IssueId::from(issue_id)).await?;
    if result.ok {
        println!("ok");
    } else {
        println!(
            "broken at entry {}",
            result
                .first_bad_entry
                .map(|id| id.to_string())
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn parse_source(value: &str) -> Result<SignalSource> {
    Ok(match value.to_lowercase().as_str() {
        "support_ticket" => SignalSource::SupportTicket,
        "api_failure" => SignalSource::ApiFailure,
        "checkout_error" => SignalSource::CheckoutError,
        "webhook_failure" => SignalSource::WebhookFailure,
        other => bail!("unknown signal source '{other}'"),
    })
}

fn parse_severity(value: &str) -> Result<Severity> {
    Ok(match value.to_lowercase().as_str() {
        "low" => Severity::Low,
        "medium" => Severity::Medium,
        "high" => Severity::High,
        "critical" => Severity::Critical,
        other => bail!("unknown severity '{other}'"),
    })
}

fn parse_stage(value: &str) -> Result<Stage> {
    Ok(match value.to_lowercase().as_str() {
        "observe" => Stage::Observe,
        "detect_patterns" => Stage::DetectPatterns,
        "analyze" => Stage::Analyze,
        "decide" => Stage::Decide,
        "assess_risk" => Stage::AssessRisk,
        "wait_approval" => Stage::WaitApproval,
        "execute" => Stage::Execute,
        "record" => Stage::Record,
        "complete" => Stage::Complete,
        other => bail!("unknown stage '{other}'"),
    })
}

fn parse_resolution(value: &str) -> Result<ResolutionKind> {
    Ok(match value.to_lowercase().as_str() {
        "resolved" => ResolutionKind::Resolved,
        "rejected" => ResolutionKind::Rejected,
        "rate_limited" => ResolutionKind::RateLimited,
        "aborted" => ResolutionKind::Aborted,
        "integrity_frozen" => ResolutionKind::IntegrityFrozen,
        other => bail!("unknown resolution '{other}'"),
    })
}

/// Races SIGINT against SIGTERM (the latter only on unix) and resolves when
/// either fires, so `serve` shuts down cleanly under both an interactive
/// Ctrl+C and an orchestrator-issued termination.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
