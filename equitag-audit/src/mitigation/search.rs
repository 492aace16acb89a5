//! Threshold grid search
//!
//! **Purpose:** Scan the fixed 101-point threshold grid for the minimum of
//! an objective that may be undefined at some thresholds.

/// Number of candidate thresholds (0.00, 0.01, ..., 1.00)
pub const GRID_POINTS: usize = 101;

/// Threshold of grid point `index`
pub fn grid_threshold(index: usize) -> f64 {
    index as f64 / (GRID_POINTS - 1) as f64
}

/// Candidate thresholds in ascending order
pub fn threshold_grid() -> impl Iterator<Item = f64> {
    (0..GRID_POINTS).map(grid_threshold)
}

/// Minimum found by [`grid_search_min`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOutcome {
    pub threshold: f64,
    pub objective: f64,
}

/// Scan the grid ascending for the smallest objective value
///
/// Candidates where `objective_fn` returns `None` or NaN are skipped. Only a
/// strictly smaller value replaces the current best, so the first minimum
/// encountered wins.
///
/// # Arguments
/// - `objective_fn`: Objective at a candidate threshold
///
/// # Returns
/// `None` when no candidate has a defined objective
pub fn grid_search_min<F>(objective_fn: F) -> Option<SearchOutcome>
where
    F: Fn(f64) -> Option<f64>,
{
    let mut best: Option<SearchOutcome> = None;
    for threshold in threshold_grid() {
        let Some(objective) = objective_fn(threshold).filter(|v| !v.is_nan()) else {
            continue;
        };
        if best.map_or(true, |b| objective < b.objective) {
            best = Some(SearchOutcome { threshold, objective });
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_shape() {
        let grid: Vec<f64> = threshold_grid().collect();
        assert_eq!(grid.len(), 101);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[100], 1.0);
        assert!((grid[40] - 0.40).abs() < 1e-12);
        assert!(grid.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_finds_minimum() {
        let outcome = grid_search_min(|t| Some((t - 0.37).abs())).unwrap();
        assert!((outcome.threshold - 0.37).abs() < 1e-12);
        assert!(outcome.objective < 1e-12);
    }

    /// Given: a flat objective
    /// Then: the first (lowest) threshold wins
    #[test]
    fn test_first_minimum_wins() {
        let outcome = grid_search_min(|t| Some(if t >= 0.2 && t <= 0.6 { 0.1 } else { 0.5 })).unwrap();
        assert!((outcome.threshold - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_undefined_candidates_skipped() {
        // undefined below 0.5, NaN at 0.5, defined above
        let outcome = grid_search_min(|t| {
            if t < 0.5 {
                None
            } else if t == 0.5 {
                Some(f64::NAN)
            } else {
                Some(t)
            }
        })
        .unwrap();
        assert!((outcome.threshold - 0.51).abs() < 1e-12);

        assert!(grid_search_min(|_| None).is_none());
    }
}
