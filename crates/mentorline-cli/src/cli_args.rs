use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use mentorline_push::PushDeliveryMode;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("invalid value '{value}': {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = parse_positive_u64(value)?;
    usize::try_from(parsed).map_err(|error| format!("invalid value '{value}': {error}"))
}

#[derive(Debug, Parser)]
#[command(
    name = "mentorline",
    about = "Mentor reply SLA sweeps, creation triggers and notification delivery",
    version
)]
pub struct Cli {
    #[arg(
        long = "db-path",
        env = "MENTORLINE_DB_PATH",
        default_value = ".mentorline/mentorline.sqlite3",
        global = true,
        help = "SQLite database holding conversations, profiles and the breach ledger"
    )]
    pub db_path: PathBuf,

    #[command(flatten)]
    pub push: PushArgs,

    #[command(flatten)]
    pub sla: SlaArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct PushArgs {
    #[arg(
        long = "push-mode",
        env = "MENTORLINE_PUSH_MODE",
        default_value = "dry_run",
        global = true,
        help = "Push delivery mode: dry_run or provider"
    )]
    pub push_mode: PushDeliveryMode,

    #[arg(
        long = "push-api-base",
        env = "MENTORLINE_PUSH_API_BASE",
        default_value = "https://fcm.googleapis.com",
        global = true,
        help = "Base URL of the push provider HTTP v1 API"
    )]
    pub push_api_base: String,

    #[arg(
        long = "push-project-id",
        env = "MENTORLINE_PUSH_PROJECT_ID",
        global = true,
        help = "Push provider project id (required in provider mode)"
    )]
    pub push_project_id: Option<String>,

    #[arg(
        long = "push-access-token",
        env = "MENTORLINE_PUSH_ACCESS_TOKEN",
        global = true,
        hide_env_values = true,
        help = "OAuth bearer token for the push provider (required in provider mode)"
    )]
    pub push_access_token: Option<String>,

    #[arg(
        long = "push-timeout-ms",
        env = "MENTORLINE_PUSH_TIMEOUT_MS",
        default_value_t = 5000,
        value_parser = parse_positive_u64,
        global = true,
        help = "HTTP timeout for each provider call"
    )]
    pub push_timeout_ms: u64,
}

#[derive(Debug, Args)]
pub struct SlaArgs {
    #[arg(
        long = "sla-window-hours",
        env = "MENTORLINE_SLA_WINDOW_HOURS",
        default_value_t = 48,
        value_parser = parse_positive_u64,
        global = true,
        help = "Hours a mentor has to reply before a learner message breaches"
    )]
    pub sla_window_hours: u64,

    #[arg(
        long = "sweep-batch-limit",
        env = "MENTORLINE_SWEEP_BATCH_LIMIT",
        default_value_t = mentorline_sla::DEFAULT_SWEEP_BATCH_LIMIT,
        value_parser = parse_positive_usize,
        global = true,
        help = "Maximum candidates examined per sweep run"
    )]
    pub sweep_batch_limit: usize,

    #[arg(
        long = "sweep-concurrency",
        env = "MENTORLINE_SWEEP_CONCURRENCY",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        global = true,
        help = "Candidates processed concurrently within one sweep run"
    )]
    pub sweep_concurrency: usize,

    #[arg(
        long = "preview-max-chars",
        env = "MENTORLINE_PREVIEW_MAX_CHARS",
        default_value_t = mentorline_sla::DEFAULT_PREVIEW_MAX_CHARS,
        value_parser = parse_positive_usize,
        global = true,
        help = "Characters of message text kept in mentor breach alerts"
    )]
    pub preview_max_chars: usize,

    #[arg(
        long = "candidate-timeout-secs",
        env = "MENTORLINE_CANDIDATE_TIMEOUT_SECS",
        default_value_t = 30,
        value_parser = parse_positive_u64,
        global = true,
        help = "Per-candidate processing timeout"
    )]
    pub candidate_timeout_secs: u64,

    #[arg(
        long = "batch-timeout-secs",
        env = "MENTORLINE_BATCH_TIMEOUT_SECS",
        default_value_t = 600,
        value_parser = parse_positive_u64,
        global = true,
        help = "Deadline for one sweep run; candidates not started by then are skipped"
    )]
    pub batch_timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct CadenceArgs {
    #[arg(
        long = "sweep-interval-minutes",
        env = "MENTORLINE_SWEEP_INTERVAL_MINUTES",
        default_value_t = 60,
        value_parser = parse_positive_u64,
        help = "Minutes between periodic sweeps (ignored when --sweep-cron is set)"
    )]
    pub sweep_interval_minutes: u64,

    #[arg(
        long = "sweep-cron",
        env = "MENTORLINE_SWEEP_CRON",
        help = "Six-field cron expression (seconds first) for periodic sweeps"
    )]
    pub sweep_cron: Option<String>,

    #[arg(
        long = "sweep-timezone",
        env = "MENTORLINE_SWEEP_TIMEZONE",
        default_value = "UTC",
        help = "IANA timezone used to evaluate --sweep-cron"
    )]
    pub sweep_timezone: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the HTTP trigger surface and run the periodic sweep.
    Serve {
        #[arg(
            long,
            env = "MENTORLINE_BIND",
            default_value = mentorline_gateway::DEFAULT_GATEWAY_BIND
        )]
        bind: String,

        #[arg(
            long = "bearer-token",
            env = "MENTORLINE_BEARER_TOKEN",
            hide_env_values = true,
            help = "Require this bearer token on every HTTP route"
        )]
        bearer_token: Option<String>,

        #[arg(long = "no-scheduler", help = "Serve HTTP only; sweeps run via the sweep route")]
        no_scheduler: bool,

        #[command(flatten)]
        cadence: CadenceArgs,
    },
    /// Run one SLA sweep and print its report.
    Sweep {
        #[arg(long)]
        json: bool,
    },
    /// Run periodic SLA sweeps until interrupted.
    Scheduler {
        #[command(flatten)]
        cadence: CadenceArgs,
    },
    /// Replay a message-created trigger from a JSON file.
    MessageCreated {
        #[arg(long = "payload-file")]
        payload_file: PathBuf,
    },
    /// Replay an announcement-created trigger from a JSON file.
    AnnouncementCreated {
        #[arg(long = "payload-file")]
        payload_file: PathBuf,
    },
    /// Enable or disable an account on behalf of an admin caller.
    SetAccountDisabled {
        #[arg(long = "caller-uid", env = "MENTORLINE_CALLER_UID")]
        caller_uid: Option<String>,
        #[arg(long)]
        uid: String,
        #[arg(long, action = clap::ArgAction::Set)]
        disabled: bool,
    },
    /// Set the admin claim on an account.
    GrantAdmin {
        #[arg(long)]
        uid: String,
    },
    /// List recorded SLA breaches, newest first.
    Breaches {
        #[arg(long = "conversation-id")]
        conversation_id: Option<String>,
        #[arg(long = "mentor-id")]
        mentor_id: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
}
