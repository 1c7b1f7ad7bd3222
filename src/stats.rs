//! Performance counters for a power-flow solve.
//!
//! Created by the caller and threaded as `Option<&mut Stats>`. Zero cost when
//! `None` — no timing calls, no counter increments.

use std::time::{Duration, Instant};

/// Collects phase timings and iteration counters across one `solve` call.
pub struct Stats {
    total_start: Instant,
    pub newton_iterations: u32,
    pub linsolve_iters_per_newton: Vec<u32>,
    pub residual_eval: Duration,
    pub jacobian_eval: Duration,
    pub preconditioner: Duration,
    pub linear_solve: Duration,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_start: Instant::now(),
            newton_iterations: 0,
            linsolve_iters_per_newton: Vec::new(),
            residual_eval: Duration::ZERO,
            jacobian_eval: Duration::ZERO,
            preconditioner: Duration::ZERO,
            linear_solve: Duration::ZERO,
        }
    }

    /// Print the stats table to stderr.
    pub fn display(&self) {
        let total = self.total_start.elapsed();
        eprintln!();
        eprintln!("=== Gridflow Performance Stats ===");
        eprintln!("  Newton iterations:      {}", self.newton_iterations);
        eprintln!("    Residual eval:        {:>8.3}s", self.residual_eval.as_secs_f64());
        eprintln!("    Jacobian eval:        {:>8.3}s", self.jacobian_eval.as_secs_f64());
        eprintln!("    Preconditioner:       {:>8.3}s", self.preconditioner.as_secs_f64());
        eprintln!("    Linear solve:         {:>8.3}s", self.linear_solve.as_secs_f64());
        if !self.linsolve_iters_per_newton.is_empty() {
            let avg: f64 = self
                .linsolve_iters_per_newton
                .iter()
                .map(|&i| i as f64)
                .sum::<f64>()
                / self.linsolve_iters_per_newton.len() as f64;
            let iters_str: Vec<String> = self
                .linsolve_iters_per_newton
                .iter()
                .map(|i| i.to_string())
                .collect();
            eprintln!("      Krylov iters:       {}", iters_str.join(" / "));
            eprintln!("      Krylov avg:         {avg:.1}");
        }
        eprintln!("  ────────────────────────────────");
        eprintln!("  Total:                  {:>8.3}s", total.as_secs_f64());
    }
}
