use crate::domain::models::Countdown;
use serde::Serialize;

pub const DEFAULT_PING_EVERY_TICKS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickMode {
    Countdown,
    Stopwatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub countdown: Countdown,
    pub ping_due: bool,
    pub expired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerState {
    mode: TickMode,
    countdown: Countdown,
    active: bool,
    ping_ticks: u32,
    ping_every: u32,
}

impl TickerState {
    pub fn new(mode: TickMode, countdown: Countdown, ping_every: u32) -> Self {
        Self {
            mode,
            countdown,
            active: false,
            ping_ticks: 0,
            ping_every: ping_every.max(1),
        }
    }

    pub fn mode(&self) -> TickMode {
        self.mode
    }

    pub fn countdown(&self) -> Countdown {
        self.countdown
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    #[cfg(test)]
    fn ping_ticks(&self) -> u32 {
        self.ping_ticks
    }

    pub fn set_ping_every(&mut self, ping_every: u32) {
        self.ping_every = ping_every.max(1);
    }

    pub fn activate(&mut self, countdown: Countdown) {
        self.countdown = countdown;
        self.ping_ticks = 0;
        self.active = true;
    }

    pub fn resume(&mut self) {
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn reset(&mut self, mode: TickMode, countdown: Countdown) {
        self.mode = mode;
        self.countdown = countdown;
        self.ping_ticks = 0;
        self.active = false;
    }

    pub fn tick(&mut self) -> TickOutcome {
        if !self.active {
            return self.outcome(false, false);
        }

        let expired = match self.mode {
            TickMode::Countdown => {
                self.countdown = self.countdown.tick_down();
                self.countdown.is_zero()
            }
            TickMode::Stopwatch => {
                self.countdown = self.countdown.tick_up();
                false
            }
        };

        self.ping_ticks += 1;
        let ping_due = self.ping_ticks >= self.ping_every;
        if ping_due || expired {
            self.ping_ticks = 0;
        }
        if expired {
            // The transitioner takes over; the next interval starts a fresh count.
            self.active = false;
        }
        self.outcome(ping_due, expired)
    }

    fn outcome(&self, ping_due: bool, expired: bool) -> TickOutcome {
        TickOutcome {
            countdown: self.countdown,
            ping_due,
            expired,
        }
    }
}
