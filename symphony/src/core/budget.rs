//! Spend accounting for paid upstream calls.
//!
//! [`BudgetGuard`] is created once at process start and shared by reference
//! (`Arc<BudgetGuard>`). Every read and write takes the same lock, so concurrent
//! `add_cost` callers never lose updates.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BudgetError {
    /// The addition that crossed the ceiling. The amount stays applied.
    #[error("Budget limit of ${limit:.2} exceeded. Current total: ${total_spent:.4}")]
    Exceeded { limit: f64, total_spent: f64 },
    #[error("cost must be a finite, non-negative amount (got {0})")]
    InvalidAmount(f64),
}

/// Raw accumulator state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BudgetState {
    pub total_spent: f64,
    pub request_count: u64,
    pub budget_limit: Option<f64>,
}

/// Point-in-time view of the guard, rounded to 4 decimal places.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub total_cost_usd: f64,
    pub request_count: u64,
    pub average_cost_per_request: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_remaining: Option<f64>,
}

#[derive(Debug, Default)]
pub struct BudgetGuard {
    state: Mutex<BudgetState>,
}

impl BudgetGuard {
    pub fn new(budget_limit: Option<f64>) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                budget_limit,
                ..BudgetState::default()
            }),
        }
    }

    /// Record the cost of one request.
    ///
    /// Returns [`BudgetError::Exceeded`] on the addition that brings the total to
    /// or past the limit (and on every addition after it). Callers decide what to
    /// stop; the guard only reports.
    pub fn add_cost(&self, amount: f64) -> Result<(), BudgetError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(BudgetError::InvalidAmount(amount));
        }
        let mut state = self.lock();
        state.total_spent += amount;
        state.request_count += 1;
        debug!(
            cost = amount,
            total = state.total_spent,
            "request cost recorded"
        );

        match state.budget_limit {
            Some(limit) if state.total_spent >= limit => {
                warn!(
                    limit,
                    total_spent = state.total_spent,
                    "budget limit reached"
                );
                Err(BudgetError::Exceeded {
                    limit,
                    total_spent: state.total_spent,
                })
            }
            _ => Ok(()),
        }
    }

    pub fn set_limit(&self, limit: Option<f64>) {
        self.lock().budget_limit = limit;
        match limit {
            Some(limit) => info!("budget limit set to ${limit:.2}"),
            None => info!("budget limit cleared"),
        }
    }

    /// Zero the accumulated spend and request count. The limit is kept.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.total_spent = 0.0;
        state.request_count = 0;
    }

    pub fn state(&self) -> BudgetState {
        *self.lock()
    }

    pub fn is_exhausted(&self) -> bool {
        let state = self.lock();
        state
            .budget_limit
            .is_some_and(|limit| state.total_spent >= limit)
    }

    pub fn summary(&self) -> BudgetSummary {
        let state = self.state();
        let average = if state.request_count == 0 {
            0.0
        } else {
            state.total_spent / state.request_count as f64
        };
        BudgetSummary {
            total_cost_usd: round4(state.total_spent),
            request_count: state.request_count,
            average_cost_per_request: round4(average),
            budget_limit: state.budget_limit,
            budget_remaining: state
                .budget_limit
                .map(|limit| round4(limit - state.total_spent)),
        }
    }

    /// Multi-line human-readable summary for terminal output.
    pub fn format_summary(&self) -> String {
        let summary = self.summary();
        let mut lines = vec![
            "Cost Summary".to_string(),
            format!("   Total Cost: ${:.4}", summary.total_cost_usd),
            format!("   Requests: {}", summary.request_count),
            format!("   Avg/Request: ${:.4}", summary.average_cost_per_request),
        ];
        if let (Some(limit), Some(remaining)) = (summary.budget_limit, summary.budget_remaining) {
            lines.push(format!("   Budget Limit: ${limit:.2}"));
            lines.push(format!("   Budget Remaining: ${remaining:.4}"));
        }
        lines.join("\n")
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        // State is plain numbers; a panic mid-update cannot leave it torn.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
