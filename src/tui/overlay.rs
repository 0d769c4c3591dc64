use std::{sync::mpsc::Sender, time::Duration};

use crossterm::event::KeyCode;
use ratatui::{
    Frame,
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, Paragraph},
};

use super::{ViewEvent, corner};
use crate::{
    focus::{Action, FocusTimer, Mode, PhaseLengths, Status},
    schedule::{FirstRun, ScheduledTask},
};

/// The focus timer drawn over a view's right-hand corners.
///
/// Owns a one-second ticker that only exists while the timer runs.
pub struct FocusOverlay {
    timer: FocusTimer,
    menu_visible: bool,
    generation: u64,
    ticker: Option<ScheduledTask>,
    events: Sender<ViewEvent>,
}

impl FocusOverlay {
    pub fn new(lengths: PhaseLengths, events: Sender<ViewEvent>) -> Self {
        Self {
            timer: FocusTimer::new(lengths),
            menu_visible: true,
            generation: 0,
            ticker: None,
            events,
        }
    }

    /// Returns true when the key belonged to the overlay.
    pub fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('s') | KeyCode::Char(' ') => self.apply(self.timer.toggle_action()),
            KeyCode::Char('x') => self.apply(Action::Reset),
            KeyCode::Char('m') => self.menu_visible = !self.menu_visible,
            _ => return false,
        }
        true
    }

    pub fn on_tick(&mut self, generation: u64) {
        if generation == self.generation {
            self.apply(Action::Tick);
        }
    }

    fn apply(&mut self, action: Action) {
        let before = self.timer;
        self.timer = before.apply(action);
        if before.mode() != self.timer.mode() && action == Action::Tick {
            log::info!(
                "{} phase finished, {} is up next",
                before.mode().label(),
                self.timer.mode().label()
            );
        }
        self.sync_ticker();
    }

    fn sync_ticker(&mut self) {
        let running = self.timer.status() == Status::Running;
        match (running, self.ticker.is_some()) {
            (true, false) => {
                self.generation += 1;
                let generation = self.generation;
                let events = self.events.clone();
                match ScheduledTask::every(
                    "focus-ticker",
                    Duration::from_secs(1),
                    FirstRun::AfterInterval,
                    move || {
                        let _ = events.send(ViewEvent::FocusTick(generation));
                    },
                ) {
                    Ok(task) => self.ticker = Some(task),
                    Err(err) => log::error!("focus timer cannot tick: {err:#}"),
                }
            }
            (false, true) => {
                self.generation += 1;
                self.ticker = None;
            }
            _ => {}
        }
    }

    pub fn render(&self, f: &mut Frame<'_>, area: Rect) {
        let accent = match self.timer.mode() {
            Mode::Focus => Color::Green,
            Mode::Break => Color::Blue,
        };

        if self.timer.is_engaged() {
            let ring = corner(area, 22, 3, true);
            let gauge = Gauge::default()
                .block(Block::default().borders(Borders::ALL))
                .gauge_style(Style::default().fg(accent))
                .ratio(self.timer.progress().clamp(0.0, 1.0))
                .label(self.timer.mode().label());
            f.render_widget(Clear, ring);
            f.render_widget(gauge, ring);
        }

        let key = Style::default().fg(Color::DarkGray);
        let (line, width) = if !self.menu_visible {
            let style = if self.timer.status() == Status::Running {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            (Line::from(Span::styled("timer [m]", style)), 13)
        } else if self.timer.is_engaged() {
            let toggle = toggle_label(self.timer.status());
            let line = Line::from(vec![
                Span::styled(
                    self.timer.display(),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
                Span::raw(" "),
                Span::styled(
                    self.timer.mode().label().to_uppercase(),
                    Style::default().fg(accent),
                ),
                Span::styled(format!("  [s] {toggle}  [x] reset  [m] hide"), key),
            ]);
            (line, 46)
        } else {
            let line = Line::from(vec![
                Span::raw("Start timer"),
                Span::styled("  [s]  [m] hide", key),
            ]);
            (line, 30)
        };

        let menu = corner(area, width, 3, false);
        f.render_widget(Clear, menu);
        f.render_widget(
            Paragraph::new(line)
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL)),
            menu,
        );
    }
}

/// What `s` does next: a finished phase starts the next one fresh.
fn toggle_label(status: Status) -> &'static str {
    match status {
        Status::Running => "pause",
        Status::Paused => "resume",
        Status::Idle => "start",
    }
}
