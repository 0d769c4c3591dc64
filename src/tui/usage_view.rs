use std::{path::PathBuf, sync::mpsc::Sender, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use crossterm::event::KeyCode;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use num_format::Locale;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
};

use super::{Flow, View, ViewEvent, overlay::FocusOverlay};
use crate::{
    focus::PhaseLengths,
    report::{format_cost, format_model_name, format_models, format_tokens},
    schedule::{FirstRun, ScheduledTask, Trigger},
    usage::{Session, SessionSource, recent_sessions},
};

pub struct UsageViewOptions {
    pub tz: Tz,
    pub locale: Locale,
    pub limit: usize,
    pub refresh: Duration,
    pub lengths: PhaseLengths,
    /// Directories whose changes trigger an early refresh.
    pub watch: Vec<PathBuf>,
}

pub struct UsageView {
    tz: Tz,
    locale: Locale,
    refresh: Duration,
    sessions: Vec<Session>,
    loaded: bool,
    last_refresh: Option<DateTime<Utc>>,
    selected: usize,
    overlay: FocusOverlay,
    refresh_now: Trigger,
    // dropped before the poller
    _watcher: Option<RecommendedWatcher>,
    _poller: ScheduledTask,
}

impl UsageView {
    pub fn start(
        source: Box<dyn SessionSource>,
        opts: UsageViewOptions,
        events: Sender<ViewEvent>,
    ) -> Result<Self> {
        let limit = opts.limit;
        let poll_events = events.clone();
        let poller = ScheduledTask::every(
            "usage-poller",
            opts.refresh,
            FirstRun::Immediately,
            move || {
                let sessions = recent_sessions(source.as_ref(), limit);
                let _ = poll_events.send(ViewEvent::Sessions(sessions));
            },
        )?;
        let refresh_now = poller.trigger();

        let watcher = match watch_usage_dirs(&opts.watch, refresh_now.clone()) {
            Ok(w) => Some(w),
            Err(err) => {
                log::warn!("live reload disabled: {err:#}");
                None
            }
        };

        Ok(Self {
            tz: opts.tz,
            locale: opts.locale,
            refresh: opts.refresh,
            sessions: Vec::new(),
            loaded: false,
            last_refresh: None,
            selected: 0,
            overlay: FocusOverlay::new(opts.lengths, events),
            refresh_now,
            _watcher: watcher,
            _poller: poller,
        })
    }

    fn apply_snapshot(&mut self, sessions: Vec<Session>) {
        self.sessions = sessions;
        self.loaded = true;
        self.last_refresh = Some(Utc::now());
        self.selected = self.selected.min(self.sessions.len().saturating_sub(1));
    }

    fn render_sessions(&self, f: &mut Frame<'_>, area: Rect) {
        let rows: Vec<Row> = self
            .sessions
            .iter()
            .map(|s| {
                let marker = if s.is_active {
                    Span::styled("●", Style::default().fg(Color::Green))
                } else {
                    Span::styled("○", Style::default().fg(Color::DarkGray))
                };
                Row::new(vec![
                    Cell::from(marker),
                    Cell::from(self.local(s.start_time, "%Y-%m-%d %H:%M")),
                    Cell::from(format_cost(s.cost_usd, 4)).style(Style::default().fg(Color::Green)),
                    Cell::from(format_tokens(s.token_counts.total(), &self.locale)),
                    Cell::from(format_models(&s.models)),
                ])
            })
            .collect();

        let table = Table::new(
            rows,
            [
                Constraint::Length(2),
                Constraint::Length(17),
                Constraint::Length(11),
                Constraint::Length(14),
                Constraint::Min(10),
            ],
        )
        .header(
            Row::new(["", "Session", "Cost", "Tokens", "Models"])
                .style(Style::default().add_modifier(Modifier::BOLD)),
        )
        .highlight_style(Style::default().bg(Color::DarkGray))
        .block(Block::default().borders(Borders::ALL).title("Sessions"));

        let mut state = TableState::default().with_selected(Some(self.selected));
        f.render_stateful_widget(table, area, &mut state);
    }

    fn render_detail(&self, f: &mut Frame<'_>, area: Rect, session: &Session) {
        let title = format!(
            "Session {} - {}",
            self.local(session.start_time, "%Y-%m-%d %H:%M"),
            self.local(session.end_time, "%H:%M")
        );
        let outer = Block::default().borders(Borders::ALL).title(title);
        let inner = outer.inner(area);
        f.render_widget(outer, area);

        let parts = Layout::default()
            .constraints([Constraint::Length(3), Constraint::Min(0)])
            .split(inner);

        let counts = &session.token_counts;
        let cards = [
            ("Input Tokens", counts.input_tokens),
            ("Output Tokens", counts.output_tokens),
            ("Cache Write", counts.cache_creation_input_tokens),
            ("Cache Read", counts.cache_read_input_tokens),
        ];
        let card_areas = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Ratio(1, 4); 4])
            .split(parts[0]);
        for ((label, value), card) in cards.iter().zip(card_areas.iter()) {
            f.render_widget(
                Paragraph::new(format_tokens(*value, &self.locale))
                    .style(Style::default().add_modifier(Modifier::BOLD))
                    .alignment(Alignment::Center)
                    .block(Block::default().borders(Borders::ALL).title(*label)),
                *card,
            );
        }

        let rows: Vec<Row> = session
            .entries
            .iter()
            .rev()
            .map(|e| {
                Row::new(vec![
                    Cell::from(self.local(e.timestamp, "%H:%M:%S")),
                    Cell::from(format_model_name(&e.model)).style(Style::default().fg(Color::Cyan)),
                    Cell::from(format!("In: {}", format_tokens(e.usage.input_tokens, &self.locale))),
                    Cell::from(format!("Out: {}", format_tokens(e.usage.output_tokens, &self.locale))),
                    Cell::from(format_cost(e.cost_usd, 5)).style(Style::default().fg(Color::Green)),
                ])
            })
            .collect();
        let entries = Table::new(
            rows,
            [
                Constraint::Length(9),
                Constraint::Min(12),
                Constraint::Length(14),
                Constraint::Length(14),
                Constraint::Length(10),
            ],
        )
        .block(Block::default().title("Recent Blocks"));
        f.render_widget(entries, parts[1]);
    }

    fn local(&self, ts: DateTime<Utc>, fmt: &str) -> String {
        ts.with_timezone(&self.tz).format(fmt).to_string()
    }
}

impl View for UsageView {
    fn on_event(&mut self, event: ViewEvent) {
        match event {
            ViewEvent::Sessions(sessions) => self.apply_snapshot(sessions),
            ViewEvent::FocusTick(generation) => self.overlay.on_tick(generation),
            ViewEvent::ClockTick => {}
        }
    }

    fn on_key(&mut self, code: KeyCode) -> Flow {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Flow::Quit,
            KeyCode::Up | KeyCode::Char('k') => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < self.sessions.len() {
                    self.selected += 1;
                }
            }
            KeyCode::Char('r') => {
                self.refresh_now.fire();
            }
            other => {
                self.overlay.handle_key(other);
            }
        }
        Flow::Continue
    }

    fn render(&self, f: &mut Frame<'_>) {
        let area = f.size();
        let chunks = Layout::default()
            .constraints([
                Constraint::Length(2),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(area);

        let updated = self
            .last_refresh
            .map(|t| self.local(t, "%H:%M:%S"))
            .unwrap_or_else(|| "-".into());
        let header = vec![
            Line::from(Span::styled(
                "Claude Code Usage",
                Style::default()
                    .fg(Color::Magenta)
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::styled(
                format!(
                    "Live monitoring of your recent sessions · updated {updated} · every {}s",
                    self.refresh.as_secs()
                ),
                Style::default().fg(Color::Gray),
            )),
        ];
        f.render_widget(Paragraph::new(header), chunks[0]);

        let body = chunks[1];
        if !self.loaded {
            f.render_widget(
                Paragraph::new("Loading usage data...").alignment(Alignment::Center),
                centered_line(body),
            );
        } else if self.sessions.is_empty() {
            f.render_widget(
                Paragraph::new("No usage sessions found.").alignment(Alignment::Center),
                centered_line(body),
            );
        } else {
            let height = list_height(self.sessions.len());
            let split = Layout::default()
                .constraints([Constraint::Length(height), Constraint::Min(0)])
                .split(body);
            self.render_sessions(f, split[0]);
            if let Some(session) = self.sessions.get(self.selected) {
                self.render_detail(f, split[1], session);
            }
        }

        f.render_widget(
            Paragraph::new("q quit · ↑/↓ select · r refresh · s timer · x reset · m menu")
                .style(Style::default().fg(Color::DarkGray)),
            chunks[2],
        );

        self.overlay.render(f, area);
    }
}

/// Rows plus borders and the header line.
fn list_height(rows: usize) -> u16 {
    u16::try_from(rows).unwrap_or(u16::MAX).saturating_add(3)
}

fn centered_line(area: Rect) -> Rect {
    let y = area.y + area.height / 2;
    Rect::new(
        area.x,
        y.min(area.bottom().saturating_sub(1)),
        area.width,
        area.height.min(1),
    )
}

fn watch_usage_dirs(dirs: &[PathBuf], refresh: Trigger) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                let touches_logs = event
                    .paths
                    .iter()
                    .any(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"));
                if touches_logs {
                    refresh.fire();
                }
            }
            Err(err) => log::warn!("watch error: {err}"),
        }
    })
    .context("creating file watcher")?;

    for dir in dirs {
        watcher
            .watch(dir, RecursiveMode::Recursive)
            .with_context(|| format!("watching {}", dir.display()))?;
    }
    Ok(watcher)
}
