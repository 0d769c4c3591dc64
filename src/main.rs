mod claude_logs;
mod clock;
mod config;
mod focus;
mod pricing;
mod report;
mod schedule;
mod tui;
mod usage;

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{RecvTimeoutError, channel},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand, builder::RangedU64ValueParser};
use directories::ProjectDirs;
use num_format::Locale;

use crate::{
    claude_logs::{ClaudeLogSource, DEFAULT_SESSION_HOURS, MAX_SESSION_HOURS},
    clock::{DEFAULT_TIMEZONE, parse_timezone, read_clock},
    config::{Layers, resolve_data_dirs, resolve_locale},
    focus::{BREAK_SECONDS, FOCUS_SECONDS, PhaseLengths},
    pricing::{CostMode, PriceTable},
    schedule::{FirstRun, ScheduledTask},
    tui::{
        clock_view::ClockView,
        usage_view::{UsageView, UsageViewOptions},
    },
    usage::{RECENT_SESSION_LIMIT, recent_sessions},
};

const DEFAULT_REFRESH_SECONDS: u64 = 5;

#[derive(Parser, Debug)]
#[command(
    name = "deskdash",
    about = "Desk dashboard: a world clock, Claude Code usage sessions and a focus timer"
)]
struct Cli {
    /// Optional config file (JSON). If omitted, tries ./deskdash.json then ~/.config/deskdash/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Timezone for the clock and timestamps (IANA name, default Asia/Tokyo)
    #[arg(long, global = true)]
    timezone: Option<String>,

    /// Locale for number formatting (e.g. en, fr, de). Falls back to en.
    #[arg(long, global = true)]
    locale: Option<String>,

    /// Override Claude data dirs (defaults: ~/.config/claude, ~/.claude). You can repeat this flag.
    #[arg(long = "data-dir", global = true)]
    data_dirs: Vec<PathBuf>,

    /// Write logs here (TUI modes default to the user cache dir)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Print JSON instead of text; implies --once
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true")]
    json: Option<bool>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Default: full-screen clock with the focus timer
    Clock(ClockArgs),
    /// Recent Claude Code usage sessions, refreshed live
    Usage(UsageArgs),
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Clock(_) => "clock",
            Command::Usage(_) => "usage",
        }
    }

    fn is_interactive(&self, json: bool) -> bool {
        match self {
            Command::Clock(args) => !(json || args.once || args.at.is_some()),
            Command::Usage(args) => !(json || args.once || args.plain),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
struct ClockArgs {
    /// Print the current reading and exit
    #[arg(long)]
    once: bool,

    /// Read the clock at this instant (RFC 3339) instead of now; implies --once
    #[arg(long, value_parser = parse_instant)]
    at: Option<DateTime<Utc>>,
}

#[derive(Args, Debug, Clone, Default)]
struct UsageArgs {
    /// Print the recent sessions and exit
    #[arg(long)]
    once: bool,

    /// Refresh a plain text table instead of the TUI (Ctrl+C to stop)
    #[arg(long)]
    plain: bool,

    /// Number of sessions to show (default 5, at most 100)
    #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..=100))]
    limit: Option<usize>,

    /// Seconds between refreshes (default 5, at most 3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    refresh_seconds: Option<u64>,

    /// Length of a session block in hours (default 5, 1 to 24)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=MAX_SESSION_HOURS as i64))]
    session_length_hours: Option<u32>,

    /// Use the bundled pricing table instead of fetching current rates
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    offline: Option<bool>,

    /// auto: recorded costUSD, else calculated; calculate: always calculate; display: recorded only
    #[arg(long, value_enum)]
    cost_mode: Option<CostMode>,

    /// Also list each session's entries (text output)
    #[arg(long)]
    entries: bool,
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

/// Settings shared by both commands after layering.
struct Common {
    tz: Tz,
    locale: Locale,
    json: bool,
    lengths: PhaseLengths,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_cfg = config::load_config(cli.config.as_ref())?;
    let command = cli
        .command
        .clone()
        .unwrap_or(Command::Clock(ClockArgs::default()));
    let layers = file_cfg.layers(command.name());

    let json = layers.pick(cli.json, |s| s.json).unwrap_or(false);
    init_logging(
        layers.pick(cli.log_file.clone(), |s| s.log_file.clone()),
        command.is_interactive(json),
    );

    let tz_raw = layers
        .pick(cli.timezone.clone(), |s| s.timezone.clone())
        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());
    let common = Common {
        tz: parse_timezone(&tz_raw)?,
        locale: resolve_locale(layers.pick(cli.locale.clone(), |s| s.locale.clone()).as_deref()),
        json,
        lengths: PhaseLengths::from_minutes(
            layers
                .pick(None, |s| s.focus_minutes)
                .unwrap_or(FOCUS_SECONDS / 60),
            layers
                .pick(None, |s| s.break_minutes)
                .unwrap_or(BREAK_SECONDS / 60),
        ),
    };

    match command {
        Command::Clock(args) => run_clock(&args, &common),
        Command::Usage(args) => {
            let explicit_dirs = if cli.data_dirs.is_empty() {
                layers.pick(None, |s| s.data_dirs.clone()).unwrap_or_default()
            } else {
                cli.data_dirs.clone()
            };
            run_usage(&args, &common, &layers, &explicit_dirs)
        }
    }
}

fn run_clock(args: &ClockArgs, common: &Common) -> Result<()> {
    if common.json || args.once || args.at.is_some() {
        let reading = read_clock(args.at.unwrap_or_else(Utc::now), &common.tz);
        if common.json {
            return report::write_json(&reading);
        }
        report::print_clock(&reading);
        return Ok(());
    }

    let (tx, rx) = channel();
    let mut view = ClockView::start(common.tz, common.lengths, tx)?;
    tui::run_view(&mut view, &rx)
}

fn run_usage(
    args: &UsageArgs,
    common: &Common,
    layers: &Layers,
    explicit_dirs: &[PathBuf],
) -> Result<()> {
    let limit = layers
        .pick(args.limit, |s| s.limit)
        .unwrap_or(RECENT_SESSION_LIMIT)
        .max(1);
    let refresh = Duration::from_secs(
        layers
            .pick(args.refresh_seconds, |s| s.refresh_seconds)
            .unwrap_or(DEFAULT_REFRESH_SECONDS)
            .max(1),
    );
    let session_hours = layers
        .pick(args.session_length_hours, |s| s.session_length_hours)
        .unwrap_or(DEFAULT_SESSION_HOURS);
    let offline = layers.pick(args.offline, |s| s.offline).unwrap_or(false);
    let cost_mode = layers
        .pick(args.cost_mode, |s| s.cost_mode)
        .unwrap_or_default();

    let prices = if cost_mode == CostMode::Display {
        PriceTable::from_map(Default::default())
    } else {
        PriceTable::load(offline)?
    };
    let data_dirs = resolve_data_dirs(explicit_dirs)?;
    let source = ClaudeLogSource::new(data_dirs, session_hours, cost_mode, prices);

    if common.json || args.once {
        let sessions = recent_sessions(&source, limit);
        if common.json {
            return report::write_json(&sessions);
        }
        report::print_sessions(&sessions, &common.tz, &common.locale, args.entries);
        return Ok(());
    }

    if args.plain {
        return run_usage_plain(source, limit, refresh, common, args.entries);
    }

    let opts = UsageViewOptions {
        tz: common.tz,
        locale: common.locale,
        limit,
        refresh,
        lengths: common.lengths,
        watch: source.project_roots(),
    };
    let (tx, rx) = channel();
    let mut view = UsageView::start(Box::new(source), opts, tx)?;
    tui::run_view(&mut view, &rx)
}

fn run_usage_plain(
    source: ClaudeLogSource,
    limit: usize,
    refresh: Duration,
    common: &Common,
    with_entries: bool,
) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || stop_flag.store(true, Ordering::SeqCst))
        .context("installing Ctrl+C handler")?;

    let (tx, rx) = channel();
    let _poller = ScheduledTask::every("usage-poller", refresh, FirstRun::Immediately, move || {
        let _ = tx.send(recent_sessions(&source, limit));
    })?;

    while !stop.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(sessions) => {
                print!("\x1B[2J\x1B[H");
                report::print_sessions(&sessions, &common.tz, &common.locale, with_entries);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

/// `RUST_LOG` filtering (default `warn`). Interactive modes own the terminal,
/// so their log goes to a file or nowhere.
fn init_logging(log_file: Option<PathBuf>, interactive: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    builder.format_timestamp_secs();

    let path = if interactive {
        log_file.or_else(default_log_path)
    } else {
        log_file
    };
    match path.map(|p| open_log_file(&p)) {
        Some(Ok(file)) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Some(Err(err)) => {
            if interactive {
                builder.filter_level(log::LevelFilter::Off);
            } else {
                eprintln!("logging to stderr: {err:#}");
            }
        }
        None if interactive => {
            builder.filter_level(log::LevelFilter::Off);
        }
        None => {}
    }
    let _ = builder.try_init();
}

fn default_log_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "deskdash", "deskdash").map(|dirs| dirs.cache_dir().join("deskdash.log"))
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating log dir {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))
}
