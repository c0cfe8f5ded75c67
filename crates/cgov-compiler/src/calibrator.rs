//! # Compile-Time Calibration
//!
//! Tracks what compilations actually cost so the full/partial crossover can
//! follow the deployment instead of a fixed constant.
//!
//! Cost model, per rule in the set (`n`) and per affected rule (`a`):
//!
//! - full:    `n * render`
//! - partial: `a * render + n * overhead`
//!
//! where `overhead` is the graph closure and splice work a partial run pays
//! for every rule. The two are equal at `a / n = 1 - overhead / render`,
//! which is clamped to the configured bounds.

use std::time::Duration;

use crate::bundle::CompileMode;
use crate::config::CompilerConfig;

/// Exponentially weighted compile-cost tracker.
#[derive(Debug, Clone)]
pub struct CompileCalibrator {
    alpha: f64,
    min_samples: u32,
    min_ratio: f64,
    max_ratio: f64,
    fixed_ratio: f64,
    adaptive: bool,
    initial_cost: f64,
    render_per_rule: Option<f64>,
    overhead_per_rule: Option<f64>,
    full_runs: u32,
    partial_runs: u32,
}

impl CompileCalibrator {
    /// A calibrator with no observations.
    pub fn new(config: &CompilerConfig) -> Self {
        Self {
            alpha: config.ewma_alpha,
            min_samples: config.min_samples,
            min_ratio: config.min_ratio,
            max_ratio: config.max_ratio,
            fixed_ratio: config.full_rebuild_ratio,
            adaptive: config.adaptive_threshold,
            initial_cost: config.initial_cost_per_rule_micros as f64,
            render_per_rule: None,
            overhead_per_rule: None,
            full_runs: 0,
            partial_runs: 0,
        }
    }

    fn ewma(&self, previous: Option<f64>, sample: f64) -> f64 {
        match previous {
            Some(p) => p + self.alpha * (sample - p),
            None => sample,
        }
    }

    /// Record one run. `render` is the time spent rendering `rendered`
    /// fragments, `total` the whole run over a set of `rules` rules.
    pub fn record(&mut self, mode: CompileMode, rendered: usize, rules: usize, render: Duration, total: Duration) {
        let render_us = render.as_secs_f64() * 1e6;
        let total_us = total.as_secs_f64() * 1e6;
        if rendered > 0 {
            self.render_per_rule = Some(self.ewma(self.render_per_rule, render_us / rendered as f64));
        }
        match mode {
            CompileMode::Full => self.full_runs += 1,
            CompileMode::Partial { .. } => {
                self.partial_runs += 1;
                if rules > 0 {
                    let overhead = ((total_us - render_us).max(0.0)) / rules as f64;
                    self.overhead_per_rule = Some(self.ewma(self.overhead_per_rule, overhead));
                }
            }
        }
    }

    /// Predicted duration of a run rendering `rendered` of `rules` fragments.
    pub fn estimate(&self, mode: CompileMode, rendered: usize, rules: usize) -> Duration {
        let render = self.render_per_rule.unwrap_or(self.initial_cost);
        let micros = match mode {
            CompileMode::Full => render * rules as f64,
            CompileMode::Partial { .. } => {
                render * rendered as f64 + self.overhead_per_rule.unwrap_or(0.0) * rules as f64
            }
        };
        Duration::from_micros(micros.max(0.0).round() as u64)
    }

    /// The ratio above which a full rebuild is chosen.
    pub fn threshold(&self) -> f64 {
        if !self.adaptive
            || self.full_runs < self.min_samples
            || self.partial_runs < self.min_samples
        {
            return self.fixed_ratio;
        }
        match (self.render_per_rule, self.overhead_per_rule) {
            (Some(render), Some(overhead)) if render > 0.0 => {
                (1.0 - overhead / render).clamp(self.min_ratio, self.max_ratio)
            }
            _ => self.fixed_ratio,
        }
    }
}
