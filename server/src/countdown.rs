//! Timed countdown with commands run before and after
//!
//! The scheduler is a plain state machine driven by the authoritative loop:
//! it never sleeps or spawns, it only reports what should be broadcast when
//! handed the current time.

use log::info;
use std::time::{Duration, Instant};

/// Longest countdown an operator may start
pub const MAX_COUNTDOWN_SECS: u32 = 3600;

const STEP: Duration = Duration::from_secs(1);

/// Something the server must broadcast on behalf of the countdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountdownEvent {
    PreCommands(String),
    Remaining(u32),
    PostCommands(String),
}

#[derive(Debug, Clone)]
struct Running {
    pre_commands: String,
    post_commands: String,
    remaining: u32,
    next_step: Instant,
}

#[derive(Debug, Default)]
pub struct CountdownScheduler {
    running: Option<Running>,
}

impl CountdownScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn remaining(&self) -> Option<u32> {
        self.running.as_ref().map(|r| r.remaining)
    }

    /// Starts a countdown, replacing any countdown already in progress
    ///
    /// Returns the events due immediately: the pre-commands followed by the
    /// initial remaining-seconds announcement. `duration_secs` must already be
    /// validated to lie in `1..=MAX_COUNTDOWN_SECS`.
    pub fn start(
        &mut self,
        pre_commands: String,
        post_commands: String,
        duration_secs: u32,
        now: Instant,
    ) -> Vec<CountdownEvent> {
        if let Some(previous) = self.running.take() {
            info!(
                "Restarting countdown ({} seconds were left)",
                previous.remaining
            );
        }

        let duration_secs = duration_secs.clamp(1, MAX_COUNTDOWN_SECS);
        info!("Countdown started: {} seconds", duration_secs);

        let events = vec![
            CountdownEvent::PreCommands(pre_commands.clone()),
            CountdownEvent::Remaining(duration_secs),
        ];
        self.running = Some(Running {
            pre_commands,
            post_commands,
            remaining: duration_secs,
            next_step: now + STEP,
        });
        events
    }

    /// Stops the countdown without running its post-commands
    pub fn cancel(&mut self) -> bool {
        match self.running.take() {
            Some(running) => {
                info!(
                    "Countdown cancelled with {} seconds left (pre-commands were {:?})",
                    running.remaining, running.pre_commands
                );
                true
            }
            None => false,
        }
    }

    /// Advances the countdown to `now`
    ///
    /// Catches up on every whole second that elapsed since the last call, so a
    /// late tick still announces each second exactly once.
    pub fn tick(&mut self, now: Instant) -> Vec<CountdownEvent> {
        let mut events = Vec::new();

        while let Some(running) = self.running.as_mut() {
            if now < running.next_step {
                break;
            }

            running.remaining -= 1;
            running.next_step += STEP;

            if running.remaining == 0 {
                let post = std::mem::take(&mut running.post_commands);
                self.running = None;
                info!("Countdown finished");
                events.push(CountdownEvent::PostCommands(post));
            } else {
                events.push(CountdownEvent::Remaining(running.remaining));
            }
        }

        events
    }
}
