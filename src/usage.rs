use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const RECENT_SESSION_LIMIT: usize = 5;

/// Placeholder model name Claude Code writes for locally generated messages.
pub const SYNTHETIC_MODEL: &str = "<synthetic>";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }

    pub fn add(&mut self, other: &TokenCounts) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }
}

/// One recorded API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub timestamp: DateTime<Utc>,
    pub usage: TokenCounts,
    #[serde(rename = "costUSD")]
    pub cost_usd: f64,
    pub model: String,
    pub version: Option<String>,
}

/// A bounded usage window aggregating its entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub entries: Vec<UsageEntry>,
    pub token_counts: TokenCounts,
    #[serde(rename = "costUSD")]
    pub cost_usd: f64,
    pub models: Vec<String>,
}

impl Session {
    /// Builds a session from its entries, which must already be in time order.
    pub fn from_entries(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        entries: Vec<UsageEntry>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut token_counts = TokenCounts::default();
        let mut cost_usd = 0.0;
        let mut models = BTreeSet::new();
        for entry in &entries {
            token_counts.add(&entry.usage);
            cost_usd += entry.cost_usd;
            if entry.model != SYNTHETIC_MODEL {
                models.insert(entry.model.clone());
            }
        }

        let actual_end_time = entries.last().map(|e| e.timestamp);
        let window = end_time - start_time;
        let is_active = actual_end_time
            .map(|last| now - last < window && now < end_time)
            .unwrap_or(false);

        Session {
            id: start_time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            start_time,
            end_time,
            actual_end_time,
            is_active,
            entries,
            token_counts,
            cost_usd,
            models: models.into_iter().collect(),
        }
    }
}

/// Anything that can hand out the full, time-ordered list of sessions.
pub trait SessionSource: Send {
    fn load_sessions(&self) -> Result<Vec<Session>>;
}

/// The dashboard contract: the `limit` latest sessions, newest first.
///
/// A failing source is logged and reported as "no sessions".
pub fn recent_sessions(source: &dyn SessionSource, limit: usize) -> Vec<Session> {
    match source.load_sessions() {
        Ok(mut sessions) => {
            let keep_from = sessions.len().saturating_sub(limit);
            let mut recent = sessions.split_off(keep_from);
            recent.reverse();
            log::debug!("loaded {} recent sessions", recent.len());
            recent
        }
        Err(err) => {
            log::error!("failed to load usage data: {err:#}");
            Vec::new()
        }
    }
}
