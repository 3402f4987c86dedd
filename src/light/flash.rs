//! Timed light effects. Each keeps its own small state and deadline; the
//! controller's run loop sleeps until the nearest one.

use crate::device::Rgb;
use std::time::Duration;
use tokio::time::Instant;

/// What a flash step asks the device to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStep {
    Show(Rgb),
    /// The sequence is over; show the solid status colour with its tone.
    Settle,
}

/// Bounded alternation between two colours, played once on entering alert.
#[derive(Debug, Clone)]
pub struct FlashSequence {
    primary: Rgb,
    secondary: Rgb,
    pairs: u32,
    steps_done: u32,
    interval: Duration,
    next: Instant,
}

impl FlashSequence {
    /// Begin a sequence. The caller shows `primary` immediately.
    pub fn start(primary: Rgb, secondary: Rgb, pairs: u32, interval: Duration) -> Self {
        Self {
            primary,
            secondary,
            pairs: pairs.max(1),
            steps_done: 1,
            interval,
            next: Instant::now() + interval,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.next
    }

    /// Advance one step.
    pub fn step(&mut self) -> FlashStep {
        if self.steps_done >= self.pairs * 2 {
            return FlashStep::Settle;
        }
        let color = if self.steps_done % 2 == 0 {
            self.primary
        } else {
            self.secondary
        };
        self.steps_done += 1;
        self.next += self.interval;
        FlashStep::Show(color)
    }

    /// Primary/secondary pairs fully shown so far.
    pub fn completed_pairs(&self) -> u32 {
        self.steps_done / 2
    }
}

/// Continuous on/off toggle for the blink effect.
#[derive(Debug, Clone)]
pub struct BlinkTimer {
    interval: Duration,
    lit: bool,
    next: Instant,
}

impl BlinkTimer {
    /// Starts in the lit phase.
    pub fn start(interval: Duration) -> Self {
        Self {
            interval,
            lit: true,
            next: Instant::now() + interval,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.next
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    /// Flip phase and schedule the next toggle. Returns the new phase.
    pub fn toggle(&mut self) -> bool {
        self.lit = !self.lit;
        self.next += self.interval;
        self.lit
    }

    /// Push the next toggle out without changing phase.
    pub fn postpone(&mut self) {
        self.next += self.interval;
    }
}
