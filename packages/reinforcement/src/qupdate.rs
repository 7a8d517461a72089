//! Bounded parameter movement.

use steward_types::ParamRange;

/// One Q-style update step:
///
/// ```text
/// p' = clamp(p + clamp(α·(r − p), ±0.1·range), bounds)
/// ```
///
/// The per-update delta is capped at 10% of the parameter's range before
/// the terminal clamp, so no single observation can swing a parameter.
pub fn step(current: f64, reward: f64, alpha: f64, range: ParamRange) -> f64 {
    let cap = range.max_delta();
    let delta = (alpha * (reward - current)).clamp(-cap, cap);
    range.clamp(current + delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_types::{ESCALATION_DELTA_RANGE, PROVIDER_WEIGHT_RANGE};

    #[test]
    fn canonical_step_from_zero() {
        // r = 1.0, α = 0.05, range [-1,1]: delta 0.05, under the 0.2 cap.
        let next = step(0.0, 1.0, 0.05, PROVIDER_WEIGHT_RANGE);
        assert!((next - 0.05).abs() < 1e-12);
    }

    #[test]
    fn delta_cap_limits_large_alpha() {
        // α = 1.0 would move the full gap of 1.0; the cap holds it at 0.2.
        let next = step(0.0, 1.0, 1.0, PROVIDER_WEIGHT_RANGE);
        assert!((next - 0.2).abs() < 1e-12);
    }

    #[test]
    fn bounds_hold_at_the_edge() {
        let next = step(0.19, 1.0, 1.0, ESCALATION_DELTA_RANGE);
        assert!(next <= ESCALATION_DELTA_RANGE.max + 1e-12);
    }

    #[test]
    fn negative_reward_moves_down() {
        let next = step(0.5, -1.0, 0.1, PROVIDER_WEIGHT_RANGE);
        assert!(next < 0.5);
        assert!((0.5 - next) <= PROVIDER_WEIGHT_RANGE.max_delta() + 1e-12);
    }
}
