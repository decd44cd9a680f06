#![forbid(unsafe_code)]

use std::time::Duration;

/// Which half of the display cycle we are in. DEFAULT shows the idle
/// animation, SCIENCE shows per-job graphics apps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Default,
    Science,
}

/// Configured durations. A zero duration disables the corresponding
/// behaviour: no default phase, no science phase, or no rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayPeriods {
    pub default_first: bool,
    pub default_period: Duration,
    pub science_period: Duration,
    pub change_period: Duration,
}

impl Default for DisplayPeriods {
    fn default() -> Self {
        Self {
            default_first: false,
            default_period: Duration::from_secs(3600),
            science_period: Duration::from_secs(600),
            change_period: Duration::from_secs(600),
        }
    }
}

/// Tracks phase membership and the time budgets across transitions.
///
/// When the default saver has to fill in during a science phase (no science
/// graphics available), that time is remembered and shortens the next
/// default phase: the viewer already got their default-saver minutes.
#[derive(Debug)]
pub struct PhaseClock {
    periods: DisplayPeriods,
    phase: Phase,
    default_phase_start: Option<Duration>,
    science_phase_start: Option<Duration>,
    default_in_science_start: Option<Duration>,
    default_in_science_accum: Duration,
    last_change_time: Option<Duration>,
}

impl PhaseClock {
    /// Picks the starting phase. Returns the clock plus whether an initial
    /// switch to the default saver should be requested.
    #[must_use]
    pub fn new(periods: DisplayPeriods, default_exists: bool, now: Duration) -> (Self, bool) {
        let start_default = default_exists && periods.default_first;
        let clock = Self {
            periods,
            phase: if start_default {
                Phase::Default
            } else {
                Phase::Science
            },
            default_phase_start: start_default.then_some(now),
            science_phase_start: (!start_default).then_some(now),
            default_in_science_start: None,
            default_in_science_accum: Duration::ZERO,
            last_change_time: None,
        };
        (clock, start_default)
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn default_in_science_accum(&self) -> Duration {
        self.default_in_science_accum
    }

    /// SCIENCE -> DEFAULT, once the science period has run out. Returns
    /// true when a switch to the default saver should be requested (it is
    /// not already on screen).
    pub fn maybe_start_default_phase(
        &mut self,
        now: Duration,
        default_exists: bool,
        default_gfx_running: bool,
    ) -> bool {
        if !default_exists
            || self.phase != Phase::Science
            || self.periods.default_period.is_zero()
        {
            return false;
        }
        let Some(start) = self.science_phase_start else {
            return false;
        };
        if now.saturating_sub(start) <= self.periods.science_period {
            return false;
        }

        self.phase = Phase::Default;
        self.default_phase_start = Some(now);
        self.science_phase_start = None;
        if default_gfx_running && let Some(began) = self.default_in_science_start {
            // The default saver was already covering for science graphics;
            // bank that time against the default phase we are entering.
            self.default_in_science_accum += now.saturating_sub(began);
        }
        self.default_in_science_start = None;

        !default_gfx_running
    }

    /// DEFAULT -> SCIENCE, once the default period (less any banked
    /// default-in-science time) has run out. Returns true on transition.
    pub fn maybe_start_science_phase(
        &mut self,
        now: Duration,
        connected: bool,
        default_gfx_running: bool,
    ) -> bool {
        if self.phase != Phase::Default || !connected || self.periods.science_period.is_zero() {
            return false;
        }
        let Some(start) = self.default_phase_start else {
            return false;
        };
        if now.saturating_sub(start) + self.default_in_science_accum <= self.periods.default_period
        {
            return false;
        }

        self.phase = Phase::Science;
        self.default_phase_start = None;
        self.default_in_science_accum = Duration::ZERO;
        self.science_phase_start = Some(now);
        if default_gfx_running {
            self.default_in_science_start = Some(now);
        }
        true
    }

    /// Whether the rotation interval asks for a different science app.
    #[must_use]
    pub fn change_due(&self, now: Duration) -> bool {
        if self.periods.change_period.is_zero() {
            return false;
        }
        match self.last_change_time {
            Some(last) => now.saturating_sub(last) > self.periods.change_period,
            None => false,
        }
    }

    pub fn note_change_attempt(&mut self, now: Duration) {
        self.last_change_time = Some(now);
    }

    pub fn note_science_launch(&mut self, now: Duration) {
        self.last_change_time = Some(now);
    }

    /// The default saver came up; if that happened inside a science phase,
    /// start the stopwatch on borrowed time.
    pub fn note_default_started(&mut self, now: Duration) {
        if self.phase == Phase::Science {
            self.default_in_science_start = Some(now);
        }
    }

    /// The default saver is being taken down to make room for science
    /// graphics; bank the time it ran.
    pub fn note_default_killed_for_science(&mut self, now: Duration) {
        if let Some(began) = self.default_in_science_start.take() {
            self.default_in_science_accum += now.saturating_sub(began);
        }
    }

    /// The default saver is gone for the session; stay in SCIENCE.
    pub fn force_science(&mut self) {
        self.phase = Phase::Science;
    }
}
