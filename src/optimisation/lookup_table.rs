use std::collections::HashMap;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::kmeans::KMeansClusteringSet;
use crate::motion_data::pose_matrix::PoseMatrix;
use crate::search::cost::weighted_distance;

/// A column of the lookup table: the poses worth searching from a group of poses.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PoseCandidateSet {
    /// Pose id the set was originally built from.
    pub set_id: usize,
    pub candidates: Vec<usize>,
    /// Mean row of the candidates.
    pub average: Vec<f32>,
}

impl PoseCandidateSet {
    /// The cheapest sample of every non empty cluster as seen from `base_pose`.
    pub fn new(
        base_pose: usize,
        clusters: &KMeansClusteringSet,
        matrix: &PoseMatrix,
        usable: impl Fn(usize) -> bool,
        weights: &[f32],
    ) -> Self {
        let mut set = Self {
            set_id: base_pose,
            ..default()
        };
        let Some(base_row) = matrix.row(base_pose) else {
            return set;
        };

        for cluster in &clusters.clusters {
            let mut lowest: Option<(f32, usize)> = None;
            for &pose_id in cluster.samples.iter().filter(|&&pose_id| usable(pose_id)) {
                let Some(row) = matrix.row(pose_id) else {
                    continue;
                };

                let cost = weighted_distance(base_row, row, weights);
                if lowest.map_or(true, |(lowest_cost, _)| cost < lowest_cost) {
                    lowest = Some((cost, pose_id));
                }
            }

            if let Some((_, pose_id)) = lowest {
                if !set.candidates.contains(&pose_id) {
                    set.candidates.push(pose_id);
                }
            }
        }

        set.calculate_average(matrix);
        set
    }

    pub fn calculate_average(&mut self, matrix: &PoseMatrix) {
        self.average = vec![0.0; matrix.atom_count()];
        let mut count = 0;
        for row in self.candidates.iter().filter_map(|&pose_id| matrix.row(pose_id)) {
            for (average, value) in self.average.iter_mut().zip(row) {
                *average += value;
            }
            count += 1;
        }

        if count > 0 {
            for average in self.average.iter_mut() {
                *average /= count as f32;
            }
        }
    }

    /// Add every candidate of `other` that is not already present.
    pub fn merge_with(&mut self, other: &Self) {
        for &pose_id in &other.candidates {
            if !self.candidates.contains(&pose_id) {
                self.candidates.push(pose_id);
            }
        }
    }

    /// Merge `other` if the two sets are similar enough.
    ///
    /// Similarity is `2 × shared / (|self| + |other|)`.
    ///
    /// ```
    /// use bevy_motion_matching_core::optimisation::lookup_table::PoseCandidateSet;
    ///
    /// let mut a = PoseCandidateSet { candidates: vec![1, 2, 3], ..Default::default() };
    /// let b = PoseCandidateSet { candidates: vec![2, 3, 4], ..Default::default() };
    ///
    /// assert!(!a.similarity_combine(&b, 0.7));
    /// assert!(a.similarity_combine(&b, 0.6));
    /// assert_eq!(a.candidates, vec![1, 2, 3, 4]);
    /// ```
    pub fn similarity_combine(&mut self, other: &Self, tolerance: f32) -> bool {
        let total = self.candidates.len() + other.candidates.len();
        if total == 0 {
            return false;
        }

        let shared = other
            .candidates
            .iter()
            .filter(|pose_id| self.candidates.contains(pose_id))
            .count();

        let similarity = (shared as f32 * 2.0) / total as f32;
        if similarity > tolerance {
            self.merge_with(other);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Candidate sets of one trait partition.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PoseLookupTable {
    pub candidate_sets: Vec<PoseCandidateSet>,
}

/// Parameters of [`PoseLookupTable::process`].
pub struct LookupTableInput<'a> {
    pub matrix: &'a PoseMatrix,
    /// Poses of the partition, each receives a candidate set.
    pub pose_ids: &'a [usize],
    pub clusters: &'a KMeansClusteringSet,
    pub weights: &'a [f32],
    pub desired_size: usize,
    pub max_column_size: usize,
}

impl PoseLookupTable {
    /// Build the table, returning the dense set index assigned to every pose.
    pub fn process(
        input: &LookupTableInput,
        usable: impl Fn(usize) -> bool,
    ) -> (Self, Vec<(usize, usize)>) {
        let matrix = input.matrix;
        let mut sets: Vec<_> = input
            .pose_ids
            .iter()
            .map(|&pose_id| {
                PoseCandidateSet::new(pose_id, input.clusters, matrix, &usable, input.weights)
            })
            .collect();

        let mut redirects = HashMap::new();
        while sets.len() > input.desired_size.max(1) {
            let Some((a, b)) = Self::closest_pair(&sets, input.weights, input.max_column_size)
            else {
                break;
            };

            let merge_from = sets.remove(b);
            let merge_to = &mut sets[a];
            merge_to.merge_with(&merge_from);
            merge_to.calculate_average(matrix);
            redirects.insert(merge_from.set_id, merge_to.set_id);
        }

        sets.sort_by_key(|set| set.set_id);
        let dense: HashMap<_, _> = sets
            .iter()
            .enumerate()
            .map(|(index, set)| (set.set_id, index))
            .collect();

        let assignments = input
            .pose_ids
            .iter()
            .filter_map(|&pose_id| {
                let mut set_id = pose_id;
                while let Some(&redirect) = redirects.get(&set_id) {
                    set_id = redirect;
                }
                dense.get(&set_id).map(|&index| (pose_id, index))
            })
            .collect();

        (Self { candidate_sets: sets }, assignments)
    }

    /// Pair of sets (`a < b`) with the closest averages, skipping full sets.
    fn closest_pair(
        sets: &[PoseCandidateSet],
        weights: &[f32],
        max_column_size: usize,
    ) -> Option<(usize, usize)> {
        let mut closest: Option<(f32, usize, usize)> = None;

        for (a, set_a) in sets.iter().enumerate() {
            if set_a.len() >= max_column_size {
                continue;
            }

            for (b, set_b) in sets.iter().enumerate().skip(a + 1) {
                if set_b.len() >= max_column_size {
                    continue;
                }

                let cost = weighted_distance(&set_a.average, &set_b.average, weights);
                if closest.map_or(true, |(lowest, ..)| cost < lowest) {
                    closest = Some((cost, a, b));
                }
            }
        }

        closest.map(|(_, a, b)| (a, b))
    }

    pub fn get(&self, set_index: usize) -> Option<&PoseCandidateSet> {
        self.candidate_sets.get(set_index)
    }

    pub fn len(&self) -> usize {
        self.candidate_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidate_sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimisation::kmeans::KMCluster;

    fn matrix() -> PoseMatrix {
        let mut matrix = PoseMatrix::new(6, 2);
        for pose_id in 0..6 {
            matrix.row_mut(pose_id).unwrap()[1] = pose_id as f32;
        }
        matrix
    }

    fn clusters() -> KMeansClusteringSet {
        KMeansClusteringSet {
            clusters: vec![
                KMCluster {
                    samples: vec![0, 1, 2],
                    ..default()
                },
                KMCluster {
                    samples: vec![3, 4, 5],
                    ..default()
                },
                KMCluster::default(),
            ],
            ..default()
        }
    }

    #[test]
    fn candidate_set_takes_cheapest_usable_sample_per_cluster() {
        let matrix = matrix();
        let set = PoseCandidateSet::new(2, &clusters(), &matrix, |pose_id| pose_id != 3, &[1.0]);

        assert_eq!(set.set_id, 2);
        assert_eq!(set.candidates, vec![2, 4]);
        assert_eq!(set.average, vec![1.0, 3.0]);
    }

    #[test]
    fn merging_redirects_every_pose_to_a_dense_set() {
        let matrix = matrix();
        let pose_ids = [0, 1, 2, 3, 4, 5];
        let input = LookupTableInput {
            matrix: &matrix,
            pose_ids: &pose_ids,
            clusters: &clusters(),
            weights: &[1.0],
            desired_size: 2,
            max_column_size: 10,
        };

        let (table, assignments) = PoseLookupTable::process(&input, |_| true);

        assert!(table.len() <= 2);
        assert_eq!(assignments.len(), pose_ids.len());
        for (_, set_index) in assignments {
            assert!(set_index < table.len());
        }
        for pair in table.candidate_sets.windows(2) {
            assert!(pair[0].set_id < pair[1].set_id);
        }
    }
}
