//! A fixed-capacity, time-aware window of recently inserted values.
//!
//! The [`Acceptor`](crate::acceptor::Acceptor) inserts the ID of every block it accepts into a
//! `Window`, so that the rest of the node can cheaply tell whether a block was accepted recently.
//!
//! Entries leave a window in exactly two ways:
//! 1. They are older than [`WindowConfig::ttl`].
//! 2. Inserting a new entry would grow the window past [`WindowConfig::max_size`], in which case the
//!    oldest entries are evicted.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

pub trait Clock: Send {
    fn now(&self) -> Instant;
}

/// [`Clock`] that reads the system's monotonic clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowConfig {
    pub max_size: usize,
    pub ttl: Duration,
}

pub struct Window<T, C: Clock = SystemClock> {
    config: WindowConfig,
    clock: C,
    entries: VecDeque<(Instant, T)>,
}

impl<T: PartialEq> Window<T, SystemClock> {
    pub fn new(config: WindowConfig) -> Self {
        Window::with_clock(config, SystemClock)
    }
}

impl<T: PartialEq, C: Clock> Window<T, C> {
    pub fn with_clock(config: WindowConfig, clock: C) -> Self {
        Window {
            config,
            clock,
            entries: VecDeque::with_capacity(config.max_size),
        }
    }

    /// Insert `value` as the newest entry, silently evicting stale entries and, if the window is full,
    /// the oldest ones.
    pub fn add(&mut self, value: T) {
        let now = self.clock.now();
        self.evict_stale(now);

        self.entries.push_back((now, value));
        while self.entries.len() > self.config.max_size {
            self.entries.pop_front();
        }
    }

    /// Get the oldest entry that has not yet expired.
    pub fn oldest(&mut self) -> Option<&T> {
        let now = self.clock.now();
        self.evict_stale(now);
        self.entries.front().map(|(_, value)| value)
    }

    /// Get the number of entries that have not yet expired.
    pub fn len(&mut self) -> usize {
        let now = self.clock.now();
        self.evict_stale(now);
        self.entries.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    pub fn contains(&mut self, value: &T) -> bool {
        let now = self.clock.now();
        self.evict_stale(now);
        self.entries.iter().any(|(_, v)| v == value)
    }

    pub fn config(&self) -> WindowConfig {
        self.config
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some((inserted_at, _)) = self.entries.front() {
            if now.saturating_duration_since(*inserted_at) > self.config.ttl {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}
