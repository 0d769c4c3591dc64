//! Pomodoro-style focus timer.
//!
//! The timer is a plain value; every change goes through [`FocusTimer::apply`]
//! so the countdown can be driven by a real ticker or by a test loop.

pub const FOCUS_SECONDS: u32 = 25 * 60;
pub const BREAK_SECONDS: u32 = 5 * 60;
/// Longest configurable phase: one day.
pub const MAX_PHASE_MINUTES: u32 = 24 * 60;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Focus,
    Break,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Focus => "Focus",
            Mode::Break => "Break",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Idle,
    Running,
    Paused,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Start,
    Pause,
    /// One second of wall-clock time.
    Tick,
    Reset,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PhaseLengths {
    pub focus_secs: u32,
    pub break_secs: u32,
}

impl Default for PhaseLengths {
    fn default() -> Self {
        Self {
            focus_secs: FOCUS_SECONDS,
            break_secs: BREAK_SECONDS,
        }
    }
}

impl PhaseLengths {
    /// Each length is clamped to `1..=MAX_PHASE_MINUTES`.
    pub fn from_minutes(focus: u32, brk: u32) -> Self {
        let secs = |minutes: u32| minutes.clamp(1, MAX_PHASE_MINUTES).saturating_mul(60);
        Self {
            focus_secs: secs(focus),
            break_secs: secs(brk),
        }
    }

    fn of(&self, mode: Mode) -> u32 {
        match mode {
            Mode::Focus => self.focus_secs,
            Mode::Break => self.break_secs,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FocusTimer {
    mode: Mode,
    status: Status,
    remaining: u32,
    lengths: PhaseLengths,
}

impl Default for FocusTimer {
    fn default() -> Self {
        Self::new(PhaseLengths::default())
    }
}

impl FocusTimer {
    pub fn new(lengths: PhaseLengths) -> Self {
        Self {
            mode: Mode::Focus,
            status: Status::Idle,
            remaining: lengths.focus_secs,
            lengths,
        }
    }

    pub fn apply(self, action: Action) -> Self {
        use Status::*;
        match (action, self.status) {
            (Action::Reset, _) => Self::new(self.lengths),
            (Action::Start, Idle | Paused) => Self {
                status: Running,
                ..self
            },
            (Action::Pause, Running) => Self {
                status: Paused,
                ..self
            },
            (Action::Tick, Running) => self.count_down(),
            _ => self,
        }
    }

    fn count_down(self) -> Self {
        let remaining = self.remaining.saturating_sub(1);
        if remaining > 0 {
            return Self { remaining, ..self };
        }
        // phases never roll into each other; the next one waits for a start
        let next = match self.mode {
            Mode::Focus => Mode::Break,
            Mode::Break => Mode::Focus,
        };
        Self {
            mode: next,
            status: Status::Idle,
            remaining: self.lengths.of(next),
            lengths: self.lengths,
        }
    }

    /// `Pause` while running, `Start` otherwise.
    pub fn toggle_action(&self) -> Action {
        match self.status {
            Status::Running => Action::Pause,
            Status::Idle | Status::Paused => Action::Start,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Length of the current phase in seconds.
    pub fn total(&self) -> u32 {
        self.lengths.of(self.mode)
    }

    /// Elapsed share of the current phase, 0.0 to 1.0.
    pub fn progress(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        f64::from(total - self.remaining.min(total)) / f64::from(total)
    }

    /// True once the timer has left its pristine state.
    pub fn is_engaged(&self) -> bool {
        self.status != Status::Idle || self.remaining != self.lengths.focus_secs
    }

    pub fn display(&self) -> String {
        format!("{:02}:{:02}", self.remaining / 60, self.remaining % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(timer: FocusTimer, ticks: u32) -> FocusTimer {
        (0..ticks).fold(timer, |t, _| t.apply(Action::Tick))
    }

    #[test]
    fn initial_state() {
        let timer = FocusTimer::default();
        assert_eq!(timer.mode(), Mode::Focus);
        assert_eq!(timer.status(), Status::Idle);
        assert_eq!(timer.display(), "25:00");
        assert!(!timer.is_engaged());
        assert_eq!(timer.progress(), 0.0);
    }

    #[test]
    fn full_focus_phase_rolls_into_idle_break_once() {
        let mut timer = FocusTimer::default().apply(Action::Start);
        let mut transitions = 0;
        for _ in 0..FOCUS_SECONDS {
            let next = timer.apply(Action::Tick);
            if next.mode() != timer.mode() {
                transitions += 1;
            }
            timer = next;
        }
        assert_eq!(transitions, 1);
        assert_eq!(timer.mode(), Mode::Break);
        assert_eq!(timer.status(), Status::Idle);
        assert_eq!(timer.display(), "05:00");

        // auto-paused: further ticks do nothing until started again
        assert_eq!(run(timer, 10), timer);
    }

    #[test]
    fn one_tick_short_of_the_end_stays_in_focus() {
        let timer = run(FocusTimer::default().apply(Action::Start), FOCUS_SECONDS - 1);
        assert_eq!(timer.mode(), Mode::Focus);
        assert_eq!(timer.status(), Status::Running);
        assert_eq!(timer.display(), "00:01");
    }

    #[test]
    fn break_rolls_back_to_focus() {
        let on_break = run(FocusTimer::default().apply(Action::Start), FOCUS_SECONDS);
        let done = run(on_break.apply(Action::Start), BREAK_SECONDS);
        assert_eq!(done.mode(), Mode::Focus);
        assert_eq!(done.status(), Status::Idle);
        assert_eq!(done.remaining(), FOCUS_SECONDS);
    }

    #[test]
    fn pause_resume_keeps_remaining() {
        let pristine = FocusTimer::default();
        let running = run(pristine.apply(pristine.toggle_action()), 42);
        let paused = running.apply(running.toggle_action());
        assert_eq!(paused.status(), Status::Paused);

        let still_paused = run(paused, 100);
        assert_eq!(still_paused.remaining(), running.remaining());

        let resumed = still_paused.apply(still_paused.toggle_action());
        assert_eq!(resumed.status(), Status::Running);
        assert_eq!(resumed.remaining(), running.remaining());
        assert_eq!(resumed.display(), "24:18");
    }

    #[test]
    fn explicit_start_and_pause_are_idempotent() {
        let running = FocusTimer::default().apply(Action::Start);
        assert_eq!(running.apply(Action::Start), running);
        let idle = FocusTimer::default();
        assert_eq!(idle.apply(Action::Pause), idle);
    }

    #[test]
    fn reset_from_any_state() {
        let pristine = FocusTimer::default();
        let running = run(pristine.apply(Action::Start), 10);
        let paused = running.apply(Action::Pause);
        let on_break = run(pristine.apply(Action::Start), FOCUS_SECONDS + 3);
        let break_running = run(on_break.apply(Action::Start), 7);

        for timer in [pristine, running, paused, on_break, break_running] {
            let reset = timer.apply(Action::Reset);
            assert_eq!(reset, pristine);
            assert_eq!(reset.display(), "25:00");
        }
    }

    #[test]
    fn progress_tracks_elapsed_share() {
        let timer = run(FocusTimer::default().apply(Action::Start), FOCUS_SECONDS / 4);
        assert!((timer.progress() - 0.25).abs() < 1e-9);
        assert!(timer.is_engaged());
    }

    #[test]
    fn custom_lengths() {
        let lengths = PhaseLengths::from_minutes(1, 0);
        assert_eq!(lengths.break_secs, 60);
        let timer = run(FocusTimer::new(lengths).apply(Action::Start), 60);
        assert_eq!(timer.mode(), Mode::Break);
        assert_eq!(timer.display(), "01:00");
    }

    #[test]
    fn huge_lengths_are_capped_at_a_day() {
        let lengths = PhaseLengths::from_minutes(100_000_000, u32::MAX);
        assert_eq!(lengths.focus_secs, MAX_PHASE_MINUTES * 60);
        assert_eq!(lengths.break_secs, 24 * 60 * 60);
        assert_eq!(FocusTimer::new(lengths).display(), "1440:00");
    }
}
