// Utility functions for the recommendation engine

/// Normalize a score to [0, 1] range
pub fn normalize_score(score: f32, min: f32, max: f32) -> f32 {
    if max - min < f32::EPSILON {
        0.5
    } else {
        ((score - min) / (max - min)).clamp(0.0, 1.0)
    }
}

/// Exponential decay weight for an interaction's age.
/// `decay_days` is the e-folding time: weight = e^(-age / decay).
pub fn decay_weight(age_days: f32, decay_days: f32) -> f32 {
    if decay_days <= 0.0 {
        return 1.0;
    }
    (-age_days / decay_days).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_score() {
        assert!((normalize_score(5.0, 0.0, 10.0) - 0.5).abs() < 0.001);
        assert!((normalize_score(10.0, 0.0, 10.0) - 1.0).abs() < 0.001);
        assert!((normalize_score(0.0, 0.0, 10.0) - 0.0).abs() < 0.001);
        // Degenerate range collapses to the midpoint.
        assert!((normalize_score(3.0, 3.0, 3.0) - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_decay_weight() {
        // Fresh interactions carry full weight.
        assert!((decay_weight(0.0, 30.0) - 1.0).abs() < 0.001);

        // One e-folding time decays to ~0.368.
        let w = decay_weight(30.0, 30.0);
        assert!((w - (-1.0f32).exp()).abs() < 0.001);

        // Older is always lighter.
        assert!(decay_weight(60.0, 30.0) < decay_weight(30.0, 30.0));
    }
}
