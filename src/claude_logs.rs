use std::{
    collections::HashSet,
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use rayon::prelude::*;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::{
    pricing::{CostMode, PriceTable},
    usage::{Session, SessionSource, TokenCounts, UsageEntry},
};

pub const PROJECTS_DIR: &str = "projects";
pub const DEFAULT_SESSION_HOURS: u32 = 5;
pub const MAX_SESSION_HOURS: u32 = 24;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    timestamp: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(rename = "costUSD", default)]
    cost_usd: Option<f64>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize)]
struct RawUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

/// A parsed entry plus the key used to drop duplicated log lines.
#[derive(Debug, Clone)]
struct KeyedEntry {
    dedup_key: Option<String>,
    entry: UsageEntry,
}

/// Reads Claude Code's JSONL transcripts and groups them into session blocks.
pub struct ClaudeLogSource {
    data_dirs: Vec<PathBuf>,
    session_length: ChronoDuration,
    cost_mode: CostMode,
    prices: PriceTable,
}

impl ClaudeLogSource {
    pub fn new(
        data_dirs: Vec<PathBuf>,
        session_hours: u32,
        cost_mode: CostMode,
        prices: PriceTable,
    ) -> Self {
        Self {
            data_dirs,
            session_length: ChronoDuration::hours(i64::from(
                session_hours.clamp(1, MAX_SESSION_HOURS),
            )),
            cost_mode,
            prices,
        }
    }

    /// Existing `projects/` folders; these are also what the live view watches.
    pub fn project_roots(&self) -> Vec<PathBuf> {
        self.data_dirs
            .iter()
            .map(|dir| dir.join(PROJECTS_DIR))
            .filter(|root| root.is_dir())
            .collect()
    }

    fn load_entries(&self, files: &[PathBuf]) -> Vec<UsageEntry> {
        let mut keyed: Vec<KeyedEntry> = files
            .par_iter()
            .flat_map(|file| self.read_file(file))
            .collect();
        keyed.sort_by_key(|k| k.entry.timestamp);

        let mut seen = HashSet::new();
        keyed
            .into_iter()
            .filter(|k| match &k.dedup_key {
                Some(key) => seen.insert(key.clone()),
                None => true,
            })
            .map(|k| k.entry)
            .collect()
    }

    fn read_file(&self, path: &Path) -> Vec<KeyedEntry> {
        let fh = match File::open(path) {
            Ok(f) => f,
            Err(err) => {
                log::warn!("skipping {}: {err}", path.display());
                return Vec::new();
            }
        };
        BufReader::new(fh)
            .lines()
            .map_while(|line| line.ok())
            // usage lines always carry this key; skip the rest without parsing
            .filter(|line| line.contains("input_tokens"))
            .filter_map(|line| serde_json::from_str::<RawRecord>(&line).ok())
            .filter_map(|raw| self.to_entry(raw))
            .collect()
    }

    fn to_entry(&self, raw: RawRecord) -> Option<KeyedEntry> {
        let timestamp = parse_timestamp(&raw.timestamp)?;
        let message = raw.message?;
        let usage = message.usage.as_ref()?;
        let usage = TokenCounts {
            input_tokens: usage.input_tokens.unwrap_or(0),
            output_tokens: usage.output_tokens.unwrap_or(0),
            cache_creation_input_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
            cache_read_input_tokens: usage.cache_read_input_tokens.unwrap_or(0),
        };
        let cost_usd = self.prices.entry_cost(
            self.cost_mode,
            raw.cost_usd,
            message.model.as_deref(),
            &usage,
        );
        let dedup_key = match (&message.id, &raw.request_id) {
            (Some(msg), Some(req)) => Some(format!("{msg}:{req}")),
            _ => None,
        };

        Some(KeyedEntry {
            dedup_key,
            entry: UsageEntry {
                timestamp,
                usage,
                cost_usd,
                model: message.model.unwrap_or_else(|| "unknown".to_string()),
                version: raw.version,
            },
        })
    }
}

impl SessionSource for ClaudeLogSource {
    fn load_sessions(&self) -> Result<Vec<Session>> {
        if self.project_roots().is_empty() {
            anyhow::bail!(
                "no Claude projects directory found under {}",
                display_paths(&self.data_dirs)
            );
        }
        let files = collect_jsonl_files(&self.data_dirs);
        let entries = self.load_entries(&files);
        log::debug!(
            "parsed {} usage entries from {} files",
            entries.len(),
            files.len()
        );
        Ok(group_into_sessions(entries, self.session_length, Utc::now()))
    }
}

/// Splits time-ordered entries into session blocks.
///
/// A block starts at its first entry floored to the UTC hour and absorbs later
/// entries until one lands more than `length` after the block start or after
/// the previous entry.
pub fn group_into_sessions(
    entries: Vec<UsageEntry>,
    length: ChronoDuration,
    now: DateTime<Utc>,
) -> Vec<Session> {
    let mut sessions = Vec::new();
    let mut current: Option<(DateTime<Utc>, Vec<UsageEntry>)> = None;

    for entry in entries {
        let ts = entry.timestamp;
        if let Some((start, block)) = current.as_mut() {
            let since_start = ts - *start;
            let since_last = block
                .last()
                .map(|e| ts - e.timestamp)
                .unwrap_or_else(ChronoDuration::zero);
            if since_start <= length && since_last <= length {
                block.push(entry);
                continue;
            }
        }
        if let Some((start, block)) = current.take() {
            sessions.push(Session::from_entries(start, block_end(start, length), block, now));
        }
        current = Some((floor_to_hour(ts), vec![entry]));
    }
    if let Some((start, block)) = current {
        sessions.push(Session::from_entries(start, block_end(start, length), block, now));
    }
    sessions
}

fn block_end(start: DateTime<Utc>, length: ChronoDuration) -> DateTime<Utc> {
    start
        .checked_add_signed(length)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(ChronoDuration::hours(1)).unwrap_or(ts)
}

pub fn collect_jsonl_files(data_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for dir in data_dirs {
        let project_root = dir.join(PROJECTS_DIR);
        if !project_root.exists() {
            continue;
        }
        for entry in WalkDir::new(project_root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.into_path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
    }
    files
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn display_paths(paths: &[PathBuf]) -> String {
    let parts: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, day, hour, minute, 0).unwrap()
    }

    fn entry(ts: DateTime<Utc>) -> UsageEntry {
        UsageEntry {
            timestamp: ts,
            usage: TokenCounts {
                input_tokens: 10,
                ..Default::default()
            },
            cost_usd: 0.25,
            model: "claude-sonnet-4".into(),
            version: None,
        }
    }

    fn source(dirs: Vec<PathBuf>, mode: CostMode) -> ClaudeLogSource {
        ClaudeLogSource::new(
            dirs,
            DEFAULT_SESSION_HOURS,
            mode,
            PriceTable::bundled().unwrap(),
        )
    }

    #[test]
    fn entries_within_window_share_a_block() {
        let five_hours = ChronoDuration::hours(5);
        let sessions = group_into_sessions(
            vec![entry(at(1, 10, 20)), entry(at(1, 12, 0)), entry(at(1, 14, 59))],
            five_hours,
            at(2, 0, 0),
        );
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].start_time, at(1, 10, 0));
        assert_eq!(sessions[0].end_time, at(1, 15, 0));
        assert_eq!(sessions[0].entries.len(), 3);
        assert_eq!(sessions[0].cost_usd, 0.75);
    }

    #[test]
    fn block_closes_after_window_from_start() {
        let sessions = group_into_sessions(
            vec![entry(at(1, 8, 0)), entry(at(1, 12, 30)), entry(at(1, 13, 30))],
            ChronoDuration::hours(5),
            at(2, 0, 0),
        );
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].entries.len(), 2);
        assert_eq!(sessions[1].start_time, at(1, 13, 0));
    }

    #[test]
    fn long_idle_gap_starts_a_new_block() {
        let sessions = group_into_sessions(
            vec![entry(at(1, 1, 10)), entry(at(1, 9, 30))],
            ChronoDuration::hours(5),
            at(2, 0, 0),
        );
        let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["2024-12-01T01:00:00.000Z", "2024-12-01T09:00:00.000Z"]);
    }

    #[test]
    fn only_the_latest_block_can_be_active() {
        let sessions = group_into_sessions(
            vec![entry(at(1, 1, 10)), entry(at(1, 9, 30))],
            ChronoDuration::hours(5),
            at(1, 10, 0),
        );
        assert!(!sessions[0].is_active);
        assert!(sessions[1].is_active);
    }

    #[test]
    fn oversized_session_length_is_clamped() {
        let src = source(Vec::new(), CostMode::Display);
        assert_eq!(src.session_length, ChronoDuration::hours(5));
        let src = ClaudeLogSource::new(
            Vec::new(),
            u32::MAX,
            CostMode::Display,
            PriceTable::bundled().unwrap(),
        );
        assert_eq!(src.session_length, ChronoDuration::hours(24));
    }

    #[test]
    fn block_end_saturates_instead_of_overflowing() {
        let sessions = group_into_sessions(
            vec![entry(at(1, 10, 0))],
            ChronoDuration::hours(u32::MAX as i64),
            at(1, 11, 0),
        );
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].end_time, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn no_entries_no_sessions() {
        assert!(group_into_sessions(Vec::new(), ChronoDuration::hours(5), at(1, 0, 0)).is_empty());
    }

    #[test]
    fn parses_assistant_lines_only() {
        let src = source(Vec::new(), CostMode::Auto);
        let line = r#"{"timestamp":"2024-12-01T10:00:00.000Z","version":"1.0.3","requestId":"req_1","costUSD":0.5,"message":{"id":"msg_1","model":"claude-sonnet-4-20250514","usage":{"input_tokens":5,"output_tokens":7}}}"#;
        let raw: RawRecord = serde_json::from_str(line).unwrap();
        let keyed = src.to_entry(raw).unwrap();
        assert_eq!(keyed.dedup_key.as_deref(), Some("msg_1:req_1"));
        assert_eq!(keyed.entry.usage.output_tokens, 7);
        assert_eq!(keyed.entry.cost_usd, 0.5);
        assert_eq!(keyed.entry.version.as_deref(), Some("1.0.3"));

        let no_usage = r#"{"timestamp":"2024-12-01T10:00:00.000Z","message":{"id":"m","model":"x"}}"#;
        let raw: RawRecord = serde_json::from_str(no_usage).unwrap();
        assert!(src.to_entry(raw).is_none());
    }

    #[test]
    fn missing_cost_is_calculated_in_auto_mode() {
        let src = source(Vec::new(), CostMode::Auto);
        let line = r#"{"timestamp":"2024-12-01T10:00:00Z","message":{"model":"claude-sonnet-4-20250514","usage":{"input_tokens":1000000,"output_tokens":0}}}"#;
        let raw: RawRecord = serde_json::from_str(line).unwrap();
        let keyed = src.to_entry(raw).unwrap();
        assert_eq!(keyed.entry.cost_usd, 3.0);
        assert!(keyed.dedup_key.is_none());
    }

    #[test]
    fn missing_projects_dir_is_an_error() {
        let src = source(vec![PathBuf::from("/definitely/not/here")], CostMode::Auto);
        let err = src.load_sessions().unwrap_err();
        assert!(err.to_string().contains("no Claude projects directory"));
    }

    #[test]
    fn loads_and_dedups_fixture_logs() {
        let src = source(vec![PathBuf::from("tests/fixtures")], CostMode::Display);
        let sessions = src.load_sessions().unwrap();
        assert_eq!(sessions.len(), 7);
        let last = sessions.last().unwrap();
        assert_eq!(last.id, "2024-12-03T05:00:00.000Z");
        assert_eq!(last.entries.len(), 1);
        assert!(sessions.windows(2).all(|w| w[0].start_time < w[1].start_time));
    }
}
