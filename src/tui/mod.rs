pub mod clock_view;
pub mod overlay;
pub mod usage_view;

use std::{
    io::Stdout,
    sync::mpsc::{Receiver, TryRecvError},
    time::Duration,
};

use anyhow::{Context, Result};
use crossterm::{
    ExecutableCommand,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Frame, Terminal, backend::CrosstermBackend, layout::Rect};

use crate::usage::Session;

const INPUT_POLL: Duration = Duration::from_millis(50);

/// Messages background tasks post to the UI thread.
#[derive(Debug)]
pub enum ViewEvent {
    ClockTick,
    /// Tagged with the generation of the ticker that sent it.
    FocusTick(u64),
    Sessions(Vec<Session>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub trait View {
    fn on_event(&mut self, event: ViewEvent);
    fn on_key(&mut self, code: KeyCode) -> Flow;
    fn render(&self, f: &mut Frame<'_>);
}

/// Raw mode plus alternate screen, undone on drop.
struct TerminalSession {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSession {
    fn enter() -> Result<Self> {
        let mut stdout = std::io::stdout();
        enable_raw_mode().context("enable raw mode")?;
        if let Err(err) = stdout.execute(EnterAlternateScreen) {
            disable_raw_mode().ok();
            return Err(err).context("enter alternate screen");
        }
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("init terminal")?;
        terminal.clear().ok();
        terminal.hide_cursor().ok();
        Ok(Self { terminal })
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        disable_raw_mode().ok();
        let _ = self.terminal.backend_mut().execute(LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Drives `view` until it asks to quit. Redraws only after input or a posted event.
pub fn run_view<V: View>(view: &mut V, events: &Receiver<ViewEvent>) -> Result<()> {
    let mut session = TerminalSession::enter()?;
    let mut dirty = true;

    loop {
        if dirty {
            session
                .terminal
                .draw(|f| view.render(f))
                .context("drawing frame")?;
            dirty = false;
        }

        if event::poll(INPUT_POLL)? {
            match event::read()? {
                Event::Key(k) if k.kind == KeyEventKind::Press => {
                    let ctrl_c = k.code == KeyCode::Char('c')
                        && k.modifiers.contains(KeyModifiers::CONTROL);
                    if ctrl_c || view.on_key(k.code) == Flow::Quit {
                        return Ok(());
                    }
                    dirty = true;
                }
                Event::Resize(_, _) => dirty = true,
                _ => {}
            }
        }

        loop {
            match events.try_recv() {
                Ok(ev) => {
                    view.on_event(ev);
                    dirty = true;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

/// A `width` x `height` box in a corner of `area`, clipped to fit.
pub fn corner(area: Rect, width: u16, height: u16, top: bool) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    let x = area.x + area.width - width;
    let y = if top {
        area.y
    } else {
        area.y + area.height - height
    };
    Rect::new(x, y, width, height)
}
