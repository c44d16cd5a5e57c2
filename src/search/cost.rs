//! Cost functions shared by pose search and offline clustering.
//!
//! Every function starts at atom `1`, atom [`FAVOUR_ATOM`] is the pose favour and
//! weight `a - 1` applies to atom `a`.

use crate::motion_data::pose_matrix::FAVOUR_ATOM;

/// Cost of `row` against the current pose.
///
/// `Σ |row[a] - current[a]| × w[a - 1] × row[0]`
///
/// ```
/// use bevy_motion_matching_core::search::cost::pose_cost;
///
/// let row = [0.5, 1.0, 4.0];
/// let current = [1.0, 3.0, 4.0];
/// assert_eq!(pose_cost(&row, &current, &[2.0, 1.0]), 2.0);
/// ```
pub fn pose_cost(row: &[f32], current: &[f32], weights: &[f32]) -> f32 {
    let favour = row[FAVOUR_ATOM];
    let mut cost = 0.0;
    for ((value, current), weight) in row[1..].iter().zip(&current[1..]).zip(weights) {
        cost += (value - current).abs() * weight * favour;
    }
    cost
}

/// [`pose_cost`] without the favour of `row`.
pub fn weighted_distance(row: &[f32], other: &[f32], weights: &[f32]) -> f32 {
    row[1..]
        .iter()
        .zip(&other[1..])
        .zip(weights)
        .map(|((value, other), weight)| (value - other).abs() * weight)
        .sum()
}

/// Lower bound of [`pose_cost`] for every row inside an axis aligned box.
///
/// Accumulated in the same order as [`pose_cost`] so rounding never overshoots it.
pub fn box_lower_bound(
    current: &[f32],
    min: &[f32],
    max: &[f32],
    weights: &[f32],
    min_favour: f32,
) -> f32 {
    let mut cost = 0.0;
    for (((current, min), max), weight) in current[1..]
        .iter()
        .zip(&min[1..])
        .zip(&max[1..])
        .zip(weights)
    {
        let distance = (min - current).max(current - max).max(0.0);
        cost += distance * weight * min_favour;
    }
    cost
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_rows_cost_nothing() {
        let row = [1.0, 0.3, -2.0, 8.0];
        for weights in [[1.0, 1.0, 1.0], [0.0, 5.0, 1e6], [3.0, 0.1, 7.0]] {
            assert_eq!(pose_cost(&row, &row, &weights), 0.0);
        }
    }

    #[test]
    fn box_bound_never_exceeds_member_cost() {
        let current = [1.0, 0.0, 0.0];
        let min = [0.5, 1.0, -1.0];
        let max = [2.0, 3.0, 1.0];
        let member = [0.5, 2.0, 0.5];
        let weights = [1.0, 4.0];

        let bound = box_lower_bound(&current, &min, &max, &weights, min[0]);
        assert_eq!(bound, 0.5);
        assert!(bound <= pose_cost(&member, &current, &weights));
    }
}
