//! # OpsPulse — Operations Checklist Tracker
//!
//! Materializes recurring operational checklists into per-day tracked
//! instances, watches each step against its scheduled start, and
//! escalates overdue work to the right humans exactly once.
//!
//! Usage:
//!   opspulse run                         # Start the scheduler loops
//!   opspulse sweep                       # One SLA sweep, then exit
//!   opspulse materialize --period daily  # One materialization pass
//!   opspulse status                      # Tasks + recent audit trail
//!   opspulse seed-demo                   # Seed a demo checklist

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use opspulse_core::OpsPulseConfig;
use opspulse_engine::escalation::EscalationPolicy;
use opspulse_engine::notify::{Notifier, NullNotifier, WebhookNotifier};
use opspulse_store::{DirectoryUser, OpsDb, Period, SubtaskTemplate, TaskTemplate};
use opspulse_scheduler::Scheduler;

#[derive(Parser)]
#[command(
    name = "opspulse",
    version,
    about = "📋 OpsPulse — recurring checklist tracking with SLA escalation"
)]
struct Cli {
    /// Config file path (default ~/.opspulse/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path (overrides config)
    #[arg(long)]
    db_path: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler and run until interrupted (default).
    Run,
    /// Run one SLA sweep and exit.
    Sweep,
    /// Run one materialization pass and exit.
    Materialize {
        /// Recurrence period to materialize: daily, weekly, monthly
        #[arg(long, default_value = "daily")]
        period: String,
    },
    /// Show task statuses and the recent audit trail.
    Status,
    /// Seed a demo checklist and directory (for local poking).
    SeedDemo,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

fn build_notifier(config: &OpsPulseConfig) -> Arc<dyn Notifier> {
    if config.notify.webhook_url.is_empty() {
        Arc::new(NullNotifier)
    } else {
        Arc::new(WebhookNotifier::new(
            &config.notify.webhook_url,
            config.notify.webhook_headers.clone(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "opspulse=debug" } else { "opspulse=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => OpsPulseConfig::load_from(Path::new(&expand_path(path)))?,
        None => OpsPulseConfig::load()?,
    };
    if let Some(db_path) = &cli.db_path {
        config.db_path = db_path.clone();
    }

    let db_path = expand_path(&config.db_path);
    if let Some(parent) = Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(OpsDb::open(Path::new(&db_path))?);
    let tz = config.timezone()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            println!("📋 OpsPulse v{}", env!("CARGO_PKG_VERSION"));
            println!("   🗄️  Database: {db_path}");
            println!("   🌏 Business timezone: {}", config.business_timezone);
            println!();
            let notifier = build_notifier(&config);
            let scheduler = Arc::new(Scheduler::new(Arc::clone(&db), config, notifier)?);
            let _handles = scheduler.spawn_all();
            tokio::signal::ctrl_c().await?;
            println!("👋 Shutting down");
        }
        Command::Sweep => {
            let policy = EscalationPolicy::from(&config.escalation);
            let outcome = opspulse_engine::sla_sweep(&db, tz, &policy, chrono::Utc::now())?;
            println!(
                "Sweep done: {} ensured, {} marked overdue, {} alert(s) won",
                outcome.ensured,
                outcome.marked_overdue,
                outcome.notifications.len()
            );
            let notifier = build_notifier(&config);
            for n in &outcome.notifications {
                if let Err(e) = notifier.deliver(n).await {
                    tracing::warn!("⚠️ Delivery failed for '{}': {e}", n.title);
                }
            }
        }
        Command::Materialize { period } => {
            let period = Period::parse(&period)
                .ok_or_else(|| anyhow::anyhow!("Unknown period '{period}'"))?;
            let today = chrono::Utc::now().with_timezone(&tz).date_naive();
            let created = opspulse_engine::materialize(&db, period, today)?;
            println!("Materialized {created} instance(s) for {today}");
        }
        Command::Status => {
            println!("Tasks:");
            for t in db.all_templates()? {
                println!(
                    "   {} '{}' [{}] → {}",
                    t.id,
                    t.name,
                    t.period.as_str(),
                    t.status
                );
            }
            println!("\nRecent audit trail:");
            for e in db.recent_audit(20)? {
                println!(
                    "   {} {} {}/{} by {} {}",
                    e.created_at.format("%m-%d %H:%M:%S"),
                    e.action,
                    e.task_id.as_deref().unwrap_or("-"),
                    e.subtask_id.as_deref().unwrap_or("-"),
                    e.actor,
                    e.detail
                );
            }
        }
        Command::SeedDemo => {
            let today = chrono::Utc::now().with_timezone(&tz).date_naive();
            db.upsert_template(&TaskTemplate {
                id: "daily-settlement".into(),
                name: "Daily Settlement".into(),
                period: Period::Daily,
                effective_from: today,
                active: true,
                owner: "Alice Tran".into(),
                report_managers: vec!["Bob Le".into()],
                escalation_managers: vec!["Carol Vu".into()],
                status: "active".into(),
            })?;
            for (i, (id, name, at)) in [
                ("report-gen", "Report Gen", "06:00"),
                ("reconcile", "Reconcile Accounts", "07:30"),
                ("sign-off", "Manager Sign-off", "09:00"),
            ]
            .iter()
            .enumerate()
            {
                db.upsert_subtask(&SubtaskTemplate {
                    id: (*id).into(),
                    task_id: "daily-settlement".into(),
                    name: (*name).into(),
                    position: i as i64,
                    scheduled_time: (*at).into(),
                    sla_hours: 1,
                    sla_minutes: 0,
                })?;
            }
            for (id, name, email) in [
                ("u-alice", "Alice Tran", "alice.tran@example.com"),
                ("u-bob", "Bob Le", "bob.le@example.com"),
                ("u-carol", "Carol Vu", "carol.vu@example.com"),
            ] {
                db.upsert_user(&DirectoryUser {
                    id: id.into(),
                    full_name: name.into(),
                    email: email.into(),
                })?;
            }
            println!("✅ Seeded demo checklist 'Daily Settlement' (3 subtasks) for {today}");
        }
    }

    Ok(())
}
