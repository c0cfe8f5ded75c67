//! Adaptive strategy state machine.
//!
//! ```text
//!            p95 > target                       p95 < target * recovery
//! Standard ───────────────▶ LatencyOptimized ─────────────────────────▶ Standard
//!    │  ▲                        ▲                                      or PriorityWeighted
//!    │  │ share < threshold      │ p95 > target
//!    ▼  │                        │
//! PriorityWeighted ──────────────┘
//! ```
//!
//! The selector stays put until the window holds `min_samples` samples.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AdaptiveConfig;
use crate::strategy::StrategyKind;
use crate::window::{RollingWindow, Sample, WindowStats};

const SWITCH_LOG_LEN: usize = 32;

/// A recorded strategy change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategySwitch {
    /// Strategy before.
    pub from: StrategyKind,
    /// Strategy after.
    pub to: StrategyKind,
    /// Window aggregates that triggered the switch.
    pub stats: WindowStats,
    /// When.
    pub at: DateTime<Utc>,
}

/// Chooses among the concrete strategies from recent samples.
#[derive(Debug, Clone)]
pub struct AdaptiveSelector {
    config: AdaptiveConfig,
    window: RollingWindow,
    current: StrategyKind,
    switches: VecDeque<StrategySwitch>,
}

impl AdaptiveSelector {
    /// A selector starting in `Standard`.
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            window: RollingWindow::new(config.window_size),
            config,
            current: StrategyKind::Standard,
            switches: VecDeque::new(),
        }
    }

    /// The strategy to use now.
    pub fn current(&self) -> StrategyKind {
        self.current
    }

    /// Window aggregates.
    pub fn stats(&self) -> WindowStats {
        self.window.stats()
    }

    /// Recent switches, oldest first.
    pub fn switches(&self) -> impl Iterator<Item = &StrategySwitch> {
        self.switches.iter()
    }

    /// Record a sample and re-evaluate the state.
    pub fn record(&mut self, sample: Sample) -> StrategyKind {
        self.window.push(sample);
        let stats = self.window.stats();
        let next = self.next_state(&stats);
        if next != self.current {
            tracing::info!(
                from = %self.current,
                to = %next,
                p95_ms = stats.p95_ms,
                high_priority_share = stats.high_priority_share,
                samples = stats.samples,
                "adaptive strategy switched"
            );
            if self.switches.len() == SWITCH_LOG_LEN {
                self.switches.pop_front();
            }
            self.switches.push_back(StrategySwitch {
                from: self.current,
                to: next,
                stats,
                at: Utc::now(),
            });
            self.current = next;
        }
        self.current
    }

    fn next_state(&self, stats: &WindowStats) -> StrategyKind {
        let c = &self.config;
        if stats.samples < c.min_samples {
            return self.current;
        }
        let by_priority = if stats.high_priority_share >= c.high_priority_share {
            StrategyKind::PriorityWeighted
        } else {
            StrategyKind::Standard
        };
        match self.current {
            StrategyKind::LatencyOptimized => {
                if stats.p95_ms < c.p95_target_ms * c.recovery_factor {
                    by_priority
                } else {
                    StrategyKind::LatencyOptimized
                }
            }
            _ if stats.p95_ms > c.p95_target_ms => StrategyKind::LatencyOptimized,
            _ => by_priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdaptiveConfig {
        AdaptiveConfig {
            window_size: 10,
            min_samples: 5,
            p95_target_ms: 50.0,
            recovery_factor: 0.8,
            high_priority_share: 0.5,
            ..AdaptiveConfig::default()
        }
    }

    fn feed(sel: &mut AdaptiveSelector, n: usize, latency_ms: f64, high_priority: bool) -> StrategyKind {
        let mut last = sel.current();
        for _ in 0..n {
            last = sel.record(Sample {
                latency_ms,
                high_priority,
            });
        }
        last
    }

    #[test]
    fn waits_for_min_samples() {
        let mut sel = AdaptiveSelector::new(config());
        assert_eq!(feed(&mut sel, 4, 500.0, false), StrategyKind::Standard);
        assert_eq!(feed(&mut sel, 1, 500.0, false), StrategyKind::LatencyOptimized);
    }

    #[test]
    fn hysteresis_on_recovery() {
        let mut sel = AdaptiveSelector::new(config());
        feed(&mut sel, 10, 100.0, false);
        assert_eq!(sel.current(), StrategyKind::LatencyOptimized);
        // p95 at 45ms is under target but above target * recovery: stay.
        assert_eq!(feed(&mut sel, 10, 45.0, false), StrategyKind::LatencyOptimized);
        assert_eq!(feed(&mut sel, 10, 10.0, false), StrategyKind::Standard);
        assert_eq!(sel.switches().count(), 2);
    }

    #[test]
    fn high_priority_traffic_selects_priority_weighting() {
        let mut sel = AdaptiveSelector::new(config());
        assert_eq!(feed(&mut sel, 10, 5.0, true), StrategyKind::PriorityWeighted);
        assert_eq!(feed(&mut sel, 10, 5.0, false), StrategyKind::Standard);
        assert_eq!(feed(&mut sel, 10, 80.0, true), StrategyKind::LatencyOptimized);
    }
}
