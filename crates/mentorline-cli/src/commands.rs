use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use mentorline_gateway::{run_gateway_server, GatewayConfig};
use mentorline_push::{HttpPushConfig, HttpPushTransport};
use mentorline_sla::{
    parse_announcement_created_event, parse_message_created_event, AppContext,
    SetAccountDisabledRequest, SlaConfig, SweepCadence, SweepReport, SweepScheduler,
};
use mentorline_store::{BreachLedgerStore, SqliteMentorshipStore};
use mentorline_types::{BreachQuery, BreachRecord};

use crate::cli_args::{CadenceArgs, Cli, Command, PushArgs, SlaArgs};

pub(crate) fn sla_config_from_args(args: &SlaArgs) -> Result<SlaConfig> {
    let window_hours =
        i64::try_from(args.sla_window_hours).context("--sla-window-hours is out of range")?;
    let window = chrono::Duration::try_hours(window_hours)
        .context("--sla-window-hours is out of range")?;
    let config = SlaConfig {
        window,
        sweep_batch_limit: args.sweep_batch_limit,
        preview_max_chars: args.preview_max_chars,
        candidate_timeout: Duration::from_secs(args.candidate_timeout_secs),
        batch_timeout: Duration::from_secs(args.batch_timeout_secs),
        sweep_concurrency: args.sweep_concurrency,
    };
    config.validate().context("invalid SLA configuration")?;
    Ok(config)
}

pub(crate) fn push_config_from_args(args: &PushArgs) -> HttpPushConfig {
    HttpPushConfig {
        mode: args.push_mode,
        api_base: args.push_api_base.clone(),
        project_id: args.push_project_id.clone(),
        access_token: args.push_access_token.clone(),
        http_timeout_ms: args.push_timeout_ms,
    }
}

pub(crate) fn cadence_from_args(args: &CadenceArgs) -> Result<SweepCadence> {
    let cadence = match args.sweep_cron.as_deref().map(str::trim) {
        Some(expression) if !expression.is_empty() => SweepCadence::Cron {
            expression: expression.to_string(),
            timezone: args.sweep_timezone.trim().to_string(),
        },
        _ => SweepCadence::Interval(Duration::from_secs(
            args.sweep_interval_minutes.saturating_mul(60),
        )),
    };
    cadence.validate().context("invalid sweep cadence")?;
    Ok(cadence)
}

fn build_context(cli: &Cli) -> Result<AppContext> {
    if let Some(parent) = cli.db_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = Arc::new(
        SqliteMentorshipStore::new(&cli.db_path)
            .with_context(|| format!("failed to open store {}", cli.db_path.display()))?,
    );
    let transport = HttpPushTransport::new(push_config_from_args(&cli.push))
        .context("failed to configure push transport")?;
    tracing::debug!(
        db_path = %cli.db_path.display(),
        push_mode = transport.mode().as_str(),
        "application context ready"
    );
    let context = AppContext::new(store, Arc::new(transport), sla_config_from_args(&cli.sla)?)?;
    Ok(context)
}

fn read_payload(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render json")?
    );
    Ok(())
}

pub(crate) fn render_sweep_report(report: &SweepReport) -> String {
    format!(
        "sla sweep: scanned={} breached={} already_handled={} replied={} muted={} malformed={} conversation_missing={} message_missing={} failed={} timed_out={} deadline_skipped={} multicasts={} delivered={} delivery_failed={}",
        report.scanned,
        report.breached,
        report.already_handled,
        report.replied,
        report.muted,
        report.malformed,
        report.conversation_missing,
        report.message_missing,
        report.failed,
        report.timed_out,
        report.deadline_skipped,
        report.multicasts_sent,
        report.addresses_delivered,
        report.addresses_failed,
    )
}

pub(crate) fn render_breach_record(record: &BreachRecord) -> String {
    format!(
        "{} breach_id={} mentor_id={} learner_id={} sent_at={}",
        record.detected_at.to_rfc3339(),
        record.breach_id,
        record.mentor_id,
        record.learner_id,
        record.message_timestamp.to_rfc3339(),
    )
}

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let context = build_context(&cli)?;
    match cli.command {
        Command::Serve {
            bind,
            bearer_token,
            no_scheduler,
            cadence,
        } => {
            let gateway = run_gateway_server(
                GatewayConfig { bind, bearer_token },
                context.clone(),
            );
            if no_scheduler {
                return gateway.await;
            }
            let scheduler = SweepScheduler::new(context.sweep(), cadence_from_args(&cadence)?)?;
            let sweeps = async { scheduler.run().await.map_err(anyhow::Error::from) };
            tokio::try_join!(gateway, sweeps)?;
        }
        Command::Sweep { json } => {
            let report = context.sweep().run_once(Utc::now()).await?;
            if json {
                print_json(&report)?;
            } else {
                println!("{}", render_sweep_report(&report));
            }
        }
        Command::Scheduler { cadence } => {
            let scheduler = SweepScheduler::new(context.sweep(), cadence_from_args(&cadence)?)?;
            scheduler.run().await?;
        }
        Command::MessageCreated { payload_file } => {
            let event = parse_message_created_event(&read_payload(&payload_file)?)?;
            let outcome = context
                .realtime()
                .handle_message_created(&event, Utc::now())
                .await?;
            print_json(&outcome)?;
        }
        Command::AnnouncementCreated { payload_file } => {
            let announcement = parse_announcement_created_event(&read_payload(&payload_file)?)?;
            let report = context
                .announcements()
                .handle_announcement_created(&announcement)
                .await?;
            print_json(&report)?;
        }
        Command::SetAccountDisabled {
            caller_uid,
            uid,
            disabled,
        } => {
            let response = context
                .admin()
                .set_account_disabled(&SetAccountDisabledRequest {
                    caller_uid,
                    uid,
                    disabled,
                })
                .await
                .map_err(|error| anyhow::anyhow!("{}: {error}", error.code()))?;
            println!("{}", response.message);
        }
        Command::GrantAdmin { uid } => {
            let account = context
                .admin()
                .grant_admin_claim(&uid)
                .await
                .map_err(|error| anyhow::anyhow!("{}: {error}", error.code()))?;
            println!("admin claim set: uid={}", account.uid);
        }
        Command::Breaches {
            conversation_id,
            mentor_id,
            limit,
            json,
        } => {
            if limit == 0 {
                bail!("--limit must be greater than 0");
            }
            let records = context
                .ledger()
                .query_breach_records(BreachQuery {
                    conversation_id,
                    mentor_id,
                    limit: Some(limit),
                })
                .await
                .context("failed to query breach records")?;
            if json {
                print_json(&records)?;
            } else if records.is_empty() {
                println!("no breach records");
            } else {
                for record in &records {
                    println!("{}", render_breach_record(record));
                }
            }
        }
    }
    Ok(())
}
