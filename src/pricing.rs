use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use clap::ValueEnum;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::usage::TokenCounts;

const LITELLM_PRICING_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";
const CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const PROVIDER_PREFIXES: [&str; 3] = ["anthropic/", "openrouter/", "openai/"];

/// How an entry's cost is derived.
#[derive(Copy, Clone, Debug, Default, ValueEnum, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CostMode {
    /// Use the recorded costUSD, calculate when it is missing
    #[default]
    Auto,
    /// Always calculate from token counts
    Calculate,
    /// Only use the recorded costUSD
    Display,
}

/// USD per million tokens for one model family.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ModelRates {
    pub input_per_million: f64,
    pub output_per_million: f64,
    #[serde(default)]
    pub cache_write_per_million: f64,
    #[serde(default)]
    pub cache_read_per_million: f64,
}

impl ModelRates {
    pub fn cost(&self, usage: &TokenCounts) -> f64 {
        let per_million = |tokens: u64, rate: f64| tokens as f64 / 1_000_000_f64 * rate;
        per_million(usage.input_tokens, self.input_per_million)
            + per_million(usage.output_tokens, self.output_per_million)
            + per_million(usage.cache_creation_input_tokens, self.cache_write_per_million)
            + per_million(usage.cache_read_input_tokens, self.cache_read_per_million)
    }
}

/// Rates keyed by model-name prefix, longest prefix wins.
#[derive(Clone, Debug)]
pub struct PriceTable {
    entries: Vec<(String, ModelRates)>,
}

impl PriceTable {
    /// Remote dataset (through the on-disk cache) unless `offline`, bundled table otherwise.
    pub fn load(offline: bool) -> Result<Self> {
        if offline {
            return Self::bundled();
        }
        Self::load_with(cache_path().as_deref(), fetch_litellm_rates)
    }

    /// Fresh cache, else `fetch` (refreshing the cache), else a stale cache,
    /// else the bundled table.
    fn load_with<F>(cache: Option<&Path>, fetch: F) -> Result<Self>
    where
        F: FnOnce() -> Result<HashMap<String, ModelRates>>,
    {
        if let Some(path) = cache.filter(|p| is_fresh(p)) {
            match read_rates_file(path) {
                Ok(map) => return Ok(Self::from_map(map)),
                Err(err) => log::warn!("ignoring pricing cache: {err:#}"),
            }
        }
        match fetch() {
            Ok(map) => {
                if let Some(path) = cache {
                    if let Err(err) = write_rates_file(path, &map) {
                        log::warn!("could not write pricing cache: {err:#}");
                    }
                }
                Ok(Self::from_map(map))
            }
            Err(err) => {
                log::warn!("failed to fetch pricing remotely ({err:#}); using cached or bundled rates");
                if let Some(map) = cache.and_then(|p| read_rates_file(p).ok()) {
                    return Ok(Self::from_map(map));
                }
                Self::bundled()
            }
        }
    }

    pub fn bundled() -> Result<Self> {
        let raw = include_str!("../data/pricing.json");
        let map: HashMap<String, ModelRates> =
            serde_json::from_str(raw).context("parsing bundled pricing")?;
        Ok(Self::from_map(map))
    }

    pub fn from_map(map: HashMap<String, ModelRates>) -> Self {
        let mut combined: HashMap<String, ModelRates> = HashMap::new();
        for (model, rates) in map {
            combined.entry(normalize_model(&model)).or_insert(rates);
        }
        let mut entries: Vec<_> = combined.into_iter().collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        PriceTable { entries }
    }

    pub fn lookup(&self, model: &str) -> Option<&ModelRates> {
        let model = normalize_model(model);
        self.entries
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix.as_str()))
            .map(|(_, rates)| rates)
    }

    /// Cost of one entry under `mode`; unknown models cost nothing.
    pub fn entry_cost(
        &self,
        mode: CostMode,
        recorded: Option<f64>,
        model: Option<&str>,
        usage: &TokenCounts,
    ) -> f64 {
        let calculated = || {
            model
                .and_then(|m| self.lookup(m))
                .map(|rates| rates.cost(usage))
                .unwrap_or(0.0)
        };
        match mode {
            CostMode::Auto => recorded.unwrap_or_else(calculated),
            CostMode::Calculate => calculated(),
            CostMode::Display => recorded.unwrap_or(0.0),
        }
    }
}

fn normalize_model(model: &str) -> String {
    let mut m = model.to_lowercase();
    for prefix in PROVIDER_PREFIXES {
        if let Some(rest) = m.strip_prefix(prefix) {
            m = rest.to_string();
        }
    }
    m
}

fn fetch_litellm_rates() -> Result<HashMap<String, ModelRates>> {
    let resp = ureq::get(LITELLM_PRICING_URL)
        .timeout(Duration::from_secs(5))
        .call()
        .context("fetching remote pricing")?;
    let json: serde_json::Value = resp.into_json().context("parsing pricing json")?;

    let mut out = HashMap::new();
    for (model, val) in json.as_object().into_iter().flatten() {
        let per_token = |field: &str| val.get(field).and_then(|v| v.as_f64());
        let (Some(input), Some(output)) = (
            per_token("input_cost_per_token"),
            per_token("output_cost_per_token"),
        ) else {
            continue;
        };
        out.insert(
            model.clone(),
            ModelRates {
                input_per_million: input * 1_000_000.0,
                output_per_million: output * 1_000_000.0,
                cache_write_per_million: per_token("cache_creation_input_token_cost")
                    .unwrap_or(0.0)
                    * 1_000_000.0,
                cache_read_per_million: per_token("cache_read_input_token_cost").unwrap_or(0.0)
                    * 1_000_000.0,
            },
        );
    }
    if out.is_empty() {
        anyhow::bail!("remote pricing dataset empty");
    }
    Ok(out)
}

fn cache_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "deskdash", "deskdash")
        .map(|dirs| dirs.cache_dir().join("pricing.json"))
}

fn is_fresh(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age < CACHE_MAX_AGE)
}

fn read_rates_file(path: &Path) -> Result<HashMap<String, ModelRates>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading pricing cache {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parsing pricing cache {}", path.display()))
}

fn write_rates_file(path: &Path, map: &HashMap<String, ModelRates>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating cache dir {}", parent.display()))?;
    }
    let contents = serde_json::to_string_pretty(map).context("serializing pricing cache")?;
    std::fs::write(path, contents)
        .with_context(|| format!("writing pricing cache {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn million(input: u64, output: u64, write: u64, read: u64) -> TokenCounts {
        TokenCounts {
            input_tokens: input * 1_000_000,
            output_tokens: output * 1_000_000,
            cache_creation_input_tokens: write * 1_000_000,
            cache_read_input_tokens: read * 1_000_000,
        }
    }

    #[test]
    fn bundled_table_prices_dated_model_names() {
        let table = PriceTable::bundled().unwrap();
        let rates = table.lookup("claude-sonnet-4-20250514").unwrap();
        assert_eq!(rates.input_per_million, 3.0);
        assert_eq!(rates.cost(&million(1, 1, 0, 0)), 18.0);
    }

    #[test]
    fn longest_prefix_wins() {
        let table = PriceTable::bundled().unwrap();
        let opus_45 = table.lookup("claude-opus-4-5-20251101").unwrap();
        let opus_4 = table.lookup("claude-opus-4-20250514").unwrap();
        assert_eq!(opus_45.input_per_million, 5.0);
        assert_eq!(opus_4.input_per_million, 15.0);
    }

    #[test]
    fn provider_prefix_is_ignored() {
        let table = PriceTable::bundled().unwrap();
        assert!(table.lookup("anthropic/claude-3-5-haiku-20241022").is_some());
        assert!(table.lookup("gpt-4o").is_none());
    }

    #[test]
    fn cost_modes() {
        let table = PriceTable::bundled().unwrap();
        let usage = million(0, 0, 1, 1);
        let model = Some("claude-sonnet-4-5");

        assert_eq!(table.entry_cost(CostMode::Auto, Some(0.5), model, &usage), 0.5);
        let calculated = table.entry_cost(CostMode::Auto, None, model, &usage);
        assert!((calculated - 4.05).abs() < 1e-9);
        assert!((table.entry_cost(CostMode::Calculate, Some(0.5), model, &usage) - 4.05).abs() < 1e-9);
        assert_eq!(table.entry_cost(CostMode::Display, None, model, &usage), 0.0);
        assert_eq!(table.entry_cost(CostMode::Calculate, None, None, &usage), 0.0);
    }

    fn rates(input: f64) -> HashMap<String, ModelRates> {
        HashMap::from([(
            "claude-test-model".to_string(),
            ModelRates {
                input_per_million: input,
                output_per_million: 0.0,
                cache_write_per_million: 0.0,
                cache_read_per_million: 0.0,
            },
        )])
    }

    fn input_rate(table: &PriceTable) -> Option<f64> {
        table.lookup("claude-test-model").map(|r| r.input_per_million)
    }

    fn age(path: &Path, by: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn fresh_cache_skips_the_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("pricing.json");
        write_rates_file(&cache, &rates(1.0)).unwrap();
        assert!(is_fresh(&cache));

        let table = PriceTable::load_with(Some(&cache), || panic!("fetched despite fresh cache"))
            .unwrap();
        assert_eq!(input_rate(&table), Some(1.0));
    }

    #[test]
    fn stale_cache_is_refreshed_from_the_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("pricing.json");
        write_rates_file(&cache, &rates(1.0)).unwrap();
        age(&cache, CACHE_MAX_AGE * 2);
        assert!(!is_fresh(&cache));

        let table = PriceTable::load_with(Some(&cache), || Ok(rates(2.0))).unwrap();
        assert_eq!(input_rate(&table), Some(2.0));
        assert_eq!(read_rates_file(&cache).unwrap(), rates(2.0));
        assert!(is_fresh(&cache));
    }

    #[test]
    fn stale_cache_beats_bundled_when_fetch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("pricing.json");
        write_rates_file(&cache, &rates(1.0)).unwrap();
        age(&cache, CACHE_MAX_AGE * 2);

        let table =
            PriceTable::load_with(Some(&cache), || Err(anyhow::anyhow!("offline"))).unwrap();
        assert_eq!(input_rate(&table), Some(1.0));
    }

    #[test]
    fn bundled_table_is_the_last_resort() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("missing").join("pricing.json");

        let table =
            PriceTable::load_with(Some(&cache), || Err(anyhow::anyhow!("offline"))).unwrap();
        assert_eq!(input_rate(&table), None);
        assert!(table.lookup("claude-sonnet-4-20250514").is_some());

        let table = PriceTable::load_with(None, || Err(anyhow::anyhow!("offline"))).unwrap();
        assert!(table.lookup("claude-sonnet-4-20250514").is_some());
    }
}
