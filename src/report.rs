use std::io::Write;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use colored::Colorize;
use num_format::{Locale, ToFormattedString};

use crate::{clock::ClockReading, usage::Session};

pub fn write_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("writing json")?;
    writeln!(stdout).context("writing json")?;
    Ok(())
}

pub fn print_clock(reading: &ClockReading) {
    println!("{}", reading.time.bold());
    println!("{}", reading.date);
    println!("{}", reading.location.dimmed());
}

pub fn print_sessions(sessions: &[Session], tz: &Tz, locale: &Locale, with_entries: bool) {
    if sessions.is_empty() {
        println!("No usage sessions found.");
        return;
    }

    println!("{}", "Recent sessions".bold());
    let mut table = SimpleTable::new(vec![
        "Session", "Until", "Input", "Output", "C/W", "C/R", "Cost", "Models",
    ]);
    for s in sessions {
        let start = s.start_time.with_timezone(tz).format("%Y-%m-%d %H:%M").to_string();
        let label = if s.is_active {
            format!("{} {}", start, "live".green())
        } else {
            start
        };
        table.add_row(vec![
            label,
            s.end_time.with_timezone(tz).format("%H:%M").to_string(),
            format_tokens(s.token_counts.input_tokens, locale),
            format_tokens(s.token_counts.output_tokens, locale),
            format_tokens(s.token_counts.cache_creation_input_tokens, locale),
            format_tokens(s.token_counts.cache_read_input_tokens, locale),
            format_cost(s.cost_usd, 4),
            format_models(&s.models),
        ]);
    }
    table.print();

    if !with_entries {
        return;
    }
    for s in sessions {
        println!(
            "\n{} {}",
            "Session".bold(),
            s.start_time.with_timezone(tz).format("%Y-%m-%d %H:%M")
        );
        let mut entries = SimpleTable::new(vec!["Time", "Model", "In", "Out", "Cost"]);
        for e in s.entries.iter().rev() {
            entries.add_row(vec![
                e.timestamp.with_timezone(tz).format("%H:%M:%S").to_string(),
                format_model_name(&e.model).dimmed().to_string(),
                format_tokens(e.usage.input_tokens, locale),
                format_tokens(e.usage.output_tokens, locale),
                format_cost(e.cost_usd, 5),
            ]);
        }
        entries.print();
    }
}

pub fn format_tokens(value: u64, locale: &Locale) -> String {
    value.to_formatted_string(locale)
}

pub fn format_cost(value: f64, decimals: usize) -> String {
    format!("${value:.decimals$}")
}

/// `claude-sonnet-4-20250514` -> `sonnet-4`
pub fn format_model_name(model: &str) -> String {
    if let Some(rest) = model.strip_prefix("claude-") {
        if let Some(idx) = rest.rfind('-') {
            let (name_part, date_part) = rest.split_at(idx);
            if date_part.len() == 9 && date_part[1..].chars().all(|c| c.is_ascii_digit()) {
                return name_part.to_string();
            }
        }
        return rest.to_string();
    }
    model.to_string()
}

pub fn format_models(models: &[String]) -> String {
    if models.is_empty() {
        return "-".into();
    }
    models
        .iter()
        .map(|m| format_model_name(m))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Box-drawn table sized to its widest cells.
struct SimpleTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl SimpleTable {
    fn new(headers: Vec<&str>) -> Self {
        Self {
            headers: headers.into_iter().map(String::from).collect(),
            rows: Vec::new(),
        }
    }

    fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(visible_width(cell));
            }
        }
        widths
    }

    fn print(&self) {
        let widths = self.widths();
        let rule = |left: &str, mid: &str, right: &str| {
            let parts: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
            format!("{left}{}{right}", parts.join(mid))
        };
        let line = |cells: &[String], style: bool| {
            let mut out = String::from("│");
            for (cell, w) in cells.iter().zip(&widths) {
                let pad = " ".repeat(w.saturating_sub(visible_width(cell)));
                let text = if style {
                    cell.cyan().bold().to_string()
                } else {
                    cell.clone()
                };
                out.push_str(&format!(" {text}{pad} │"));
            }
            out
        };

        println!("{}", rule("┌", "┬", "┐"));
        println!("{}", line(&self.headers, true));
        println!("{}", rule("├", "┼", "┤"));
        for row in &self.rows {
            println!("{}", line(row, false));
        }
        println!("{}", rule("└", "┴", "┘"));
    }
}

/// Character count ignoring ANSI color sequences.
fn visible_width(s: &str) -> usize {
    let mut width = 0;
    let mut in_escape = false;
    for c in s.chars() {
        match (in_escape, c) {
            (_, '\x1b') => in_escape = true,
            (true, 'm') => in_escape = false,
            (true, _) => {}
            (false, _) => width += 1,
        }
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_drop_vendor_and_date() {
        assert_eq!(format_model_name("claude-sonnet-4-20250514"), "sonnet-4");
        assert_eq!(format_model_name("claude-opus-4-5"), "opus-4-5");
        assert_eq!(format_model_name("gpt-4o"), "gpt-4o");
        assert_eq!(format_models(&[]), "-");
    }

    #[test]
    fn costs_and_tokens() {
        assert_eq!(format_cost(1.23456, 4), "$1.2346");
        assert_eq!(format_cost(0.000012, 5), "$0.00001");
        assert_eq!(format_tokens(1234567, &Locale::en), "1,234,567");
    }

    #[test]
    fn ansi_sequences_have_no_width() {
        assert_eq!(visible_width("\x1b[32mlive\x1b[0m"), 4);
        assert_eq!(visible_width("plain"), 5);
    }
}
