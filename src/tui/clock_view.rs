use std::{sync::mpsc::Sender, time::Duration};

use anyhow::Result;
use chrono::Utc;
use chrono_tz::Tz;
use crossterm::event::KeyCode;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Layout},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::Paragraph,
};

use super::{Flow, View, ViewEvent, overlay::FocusOverlay};
use crate::{
    clock::{ClockReading, read_clock},
    focus::PhaseLengths,
    schedule::{FirstRun, ScheduledTask},
};

const CLOCK_TICK: Duration = Duration::from_secs(1);

pub struct ClockView {
    tz: Tz,
    overlay: FocusOverlay,
    _ticker: ScheduledTask,
}

impl ClockView {
    pub fn start(tz: Tz, lengths: PhaseLengths, events: Sender<ViewEvent>) -> Result<Self> {
        let tick_events = events.clone();
        let ticker = ScheduledTask::every("clock", CLOCK_TICK, FirstRun::AfterInterval, move || {
            let _ = tick_events.send(ViewEvent::ClockTick);
        })?;
        Ok(Self {
            tz,
            overlay: FocusOverlay::new(lengths, events),
            _ticker: ticker,
        })
    }
}

impl View for ClockView {
    fn on_event(&mut self, event: ViewEvent) {
        match event {
            ViewEvent::FocusTick(generation) => self.overlay.on_tick(generation),
            // the clock reads the time while drawing
            ViewEvent::ClockTick | ViewEvent::Sessions(_) => {}
        }
    }

    fn on_key(&mut self, code: KeyCode) -> Flow {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => Flow::Quit,
            other => {
                self.overlay.handle_key(other);
                Flow::Continue
            }
        }
    }

    fn render(&self, f: &mut Frame<'_>) {
        let area = f.size();
        render_face(f, &read_clock(Utc::now(), &self.tz));
        self.overlay.render(f, area);
    }
}

fn render_face(f: &mut Frame<'_>, reading: &ClockReading) {
    let area = f.size();
    let rows = Layout::default()
        .constraints([
            Constraint::Percentage(35),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .split(area);

    let dim = Style::default().fg(Color::Gray);
    f.render_widget(
        Paragraph::new(reading.date.as_str())
            .style(dim)
            .alignment(Alignment::Center),
        rows[1],
    );
    f.render_widget(
        Paragraph::new("────────")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center),
        rows[2],
    );
    f.render_widget(
        Paragraph::new(vec![
            Line::raw(""),
            Line::raw(spaced(&reading.time)),
        ])
        .style(Style::default().fg(Color::White).add_modifier(Modifier::BOLD))
        .alignment(Alignment::Center),
        rows[3],
    );
    f.render_widget(
        Paragraph::new(spaced(&reading.location))
            .style(dim)
            .alignment(Alignment::Center),
        rows[4],
    );
}

/// Letter-spaced text for the large clock lines.
fn spaced(text: &str) -> String {
    let chars: Vec<String> = text.chars().map(String::from).collect();
    chars.join(" ")
}
