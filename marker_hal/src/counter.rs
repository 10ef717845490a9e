//! Acknowledgment counting per answer class.
//!
//! The marker pipelines fragments and answers them asynchronously, without
//! any request id. Completion is therefore tracked by counting: every
//! enqueued fragment raises `expected` of its class by the number of
//! logical operations it stands for, every matching answer raises
//! `completed`. A class `weight` converts raw answers into logical
//! operations (the marker sends two `ST` answers per motion).

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Answer classes recognised by their leading token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckClass {
    /// Motion completion (`ST ...`), two answers per logical operation.
    Motion,
}

impl AckClass {
    /// Every known class.
    pub const ALL: [AckClass; 1] = [AckClass::Motion];

    /// Leading token of answers of this class.
    pub const fn prefix(&self) -> &'static str {
        match self {
            AckClass::Motion => "ST",
        }
    }

    /// Logical operations represented by one raw answer.
    pub const fn weight(&self) -> f64 {
        match self {
            AckClass::Motion => 0.5,
        }
    }

    /// Class of an answer prefix; `None` for unknown prefixes.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.prefix() == prefix)
    }
}

/// Expected/completed bookkeeping of one answer class.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandCounter {
    expected: u64,
    completed: u64,
    weight: f64,
    first_ack: Option<Instant>,
    elapsed: Duration,
    eta: Option<Duration>,
}

impl CommandCounter {
    /// Empty counter with the given answer weight.
    pub fn new(weight: f64) -> Self {
        Self {
            expected: 0,
            completed: 0,
            weight,
            first_ack: None,
            elapsed: Duration::ZERO,
            eta: None,
        }
    }

    /// Logical operations issued so far.
    #[inline]
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Raw answers received so far.
    #[inline]
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Logical operations acknowledged so far.
    #[inline]
    pub fn done(&self) -> f64 {
        self.completed as f64 * self.weight
    }

    /// Acknowledged share of issued operations in percent.
    ///
    /// 100 when nothing has been issued.
    pub fn percent_done(&self) -> f64 {
        if self.expected == 0 {
            return 100.0;
        }
        self.done() / self.expected as f64 * 100.0
    }

    /// Whether every issued operation has been acknowledged.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.done() == self.expected as f64
    }

    /// Time between the first answer of this session and the latest one.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Extrapolated time until every issued operation is acknowledged.
    #[inline]
    pub fn eta(&self) -> Option<Duration> {
        self.eta
    }

    /// Register `count` issued operations.
    pub fn expect(&mut self, count: u64) {
        self.expected += count;
    }

    /// Register one received answer at `now` and refresh the timing estimate.
    pub fn complete(&mut self, now: Instant) {
        self.completed += 1;
        let first = *self.first_ack.get_or_insert(now);
        self.elapsed = now.saturating_duration_since(first);

        let done = self.done();
        let remaining = self.expected as f64 - done;
        self.eta = if done > 0.0 && remaining > 0.0 {
            Some(self.elapsed.mul_f64(remaining / done))
        } else {
            None
        };
    }
}

/// Counters of every answer class, owned by one engine.
#[derive(Debug, Clone)]
pub struct CounterSet {
    counters: HashMap<AckClass, CommandCounter>,
}

impl CounterSet {
    /// Fresh counters for every class.
    pub fn new() -> Self {
        let counters = AckClass::ALL
            .into_iter()
            .map(|class| (class, CommandCounter::new(class.weight())))
            .collect();
        Self { counters }
    }

    /// Counter of `class`.
    pub fn get(&self, class: AckClass) -> &CommandCounter {
        &self.counters[&class]
    }

    /// Mutable counter of `class`.
    pub fn get_mut(&mut self, class: AckClass) -> &mut CommandCounter {
        self.counters
            .entry(class)
            .or_insert_with(|| CommandCounter::new(class.weight()))
    }
}

impl Default for CounterSet {
    fn default() -> Self {
        Self::new()
    }
}
