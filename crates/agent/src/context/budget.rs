//! Token budget split across prompt sections.

use aegis_config::BudgetRatios;
use serde::{Deserialize, Serialize};

/// Integer token quotas for one request. The five fields always sum to the
/// window they were allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub system_prompt: usize,
    pub memories: usize,
    pub summary: usize,
    pub messages: usize,
    /// Headroom left for the model's reply
    pub reserve: usize,
}

impl Budget {
    pub fn total(&self) -> usize {
        self.system_prompt + self.memories + self.summary + self.messages + self.reserve
    }

    /// Tokens that may be spent on the prompt itself.
    pub fn prompt_tokens(&self) -> usize {
        self.total() - self.reserve
    }
}

/// Split `total_tokens` by `ratios`.
///
/// Each of the first four quotas is rounded down; whatever rounding leaves
/// over goes to `reserve`.
pub fn allocate_budget(total_tokens: usize, ratios: &BudgetRatios) -> Budget {
    let mut remaining = total_tokens;
    let mut take = |ratio: f64| {
        let share = share_of(total_tokens, ratio).min(remaining);
        remaining -= share;
        share
    };

    let system_prompt = take(ratios.system_prompt);
    let memories = take(ratios.memories);
    let summary = take(ratios.summary);
    let messages = take(ratios.messages);

    Budget {
        system_prompt,
        memories,
        summary,
        messages,
        reserve: remaining,
    }
}

// Ratios are applied in basis points so that 0.15 * 8000 is exactly 1200
// rather than 1199.999...
fn share_of(total: usize, ratio: f64) -> usize {
    let basis_points = (ratio.clamp(0.0, 1.0) * 10_000.0).round() as u128;
    (total as u128 * basis_points / 10_000) as usize
}
