use bevy::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::SetupError;
use crate::motion_data::pose_matrix::PoseMatrix;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KMeansSettings {
    /// Number of clusters (K), clamped to the number of eligible poses.
    pub cluster_count: usize,
    pub max_iterations: usize,
    /// Independently seeded clusterings, the one with the lowest variance is kept.
    pub attempts: usize,
    /// Pick random initial centers instead of farthest point seeding.
    pub fast_init: bool,
    pub seed: u64,
    /// Center movement under which a cluster is considered settled.
    pub tolerance: f32,
}

impl Default for KMeansSettings {
    fn default() -> Self {
        Self {
            cluster_count: 50,
            max_iterations: 50,
            attempts: 1,
            fast_init: true,
            seed: 0,
            tolerance: 1.0,
        }
    }
}

impl KMeansSettings {
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.cluster_count == 0 {
            return Err(SetupError::InvalidClustering("cluster count must be at least 1"));
        }
        if self.max_iterations == 0 {
            return Err(SetupError::InvalidClustering("max iterations must be at least 1"));
        }
        if self.attempts == 0 {
            return Err(SetupError::InvalidClustering("attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Poses of one trait partition, seen through their trajectory atoms.
pub struct ClusterInput<'a> {
    pub matrix: &'a PoseMatrix,
    /// Poses allowed to join a cluster.
    pub pose_ids: &'a [usize],
    /// Matrix atoms of every trajectory feature.
    pub trajectory_atoms: &'a [usize],
    /// Calibration of the partition, indexed by `atom - 1`.
    pub weights: &'a [f32],
}

impl ClusterInput<'_> {
    fn trajectory(&self, pose_id: usize) -> impl Iterator<Item = f32> + '_ {
        let row = self.matrix.row(pose_id).unwrap_or_default();
        self.trajectory_atoms
            .iter()
            .map(move |&atom| row.get(atom).copied().unwrap_or_default())
    }

    /// Calibrated trajectory distance of a pose to a center.
    fn calibrated_distance(&self, pose_id: usize, center: &[f32]) -> f32 {
        self.trajectory(pose_id)
            .zip(center)
            .zip(self.trajectory_atoms)
            .map(|((value, center), &atom)| {
                (value - center).abs() * self.weights.get(atom - 1).copied().unwrap_or_default()
            })
            .sum()
    }

    fn pose_cost(&self, pose_id: usize, center: &[f32]) -> f32 {
        self.calibrated_distance(pose_id, center) * self.matrix.favour(pose_id)
    }

    fn raw_distance(&self, a: usize, b: usize) -> f32 {
        self.trajectory(a)
            .zip(self.trajectory(b))
            .map(|(a, b)| (a - b).abs())
            .sum()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct KMCluster {
    /// Mean trajectory of the members.
    pub center: Vec<f32>,
    /// Member pose ids.
    pub samples: Vec<usize>,
    pub variance: f32,
}

impl KMCluster {
    fn from_pose(input: &ClusterInput, pose_id: usize) -> Self {
        Self {
            center: input.trajectory(pose_id).collect(),
            samples: Vec::new(),
            variance: 0.0,
        }
    }

    /// Move the center to the mean of the members, returning how far it moved.
    ///
    /// Empty clusters keep their center and single members become the center.
    fn recalculate_center(&mut self, input: &ClusterInput) -> f32 {
        match self.samples.as_slice() {
            [] => 0.0,
            [single] => {
                self.center = input.trajectory(*single).collect();
                0.0
            }
            samples => {
                let mut mean = vec![0.0; self.center.len()];
                for &pose_id in samples {
                    for (mean, value) in mean.iter_mut().zip(input.trajectory(pose_id)) {
                        *mean += value;
                    }
                }
                for mean in mean.iter_mut() {
                    *mean /= samples.len() as f32;
                }

                let delta = self
                    .center
                    .iter()
                    .zip(&mean)
                    .map(|(a, b)| (a - b).abs())
                    .sum();
                self.center = mean;
                delta
            }
        }
    }

    /// Largest trajectory distance between two members.
    fn calculate_variance(&mut self, input: &ClusterInput) -> f32 {
        let mut variance = 0.0f32;
        for (i, &a) in self.samples.iter().enumerate() {
            for &b in &self.samples[i + 1..] {
                variance = variance.max(input.raw_distance(a, b));
            }
        }
        self.variance = variance;
        variance
    }
}

/// Trajectory clusters of one trait partition.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct KMeansClusteringSet {
    pub clusters: Vec<KMCluster>,
    pub variance: f32,
    /// Assignment passes run before the centers settled.
    pub iterations: usize,
}

impl KMeansClusteringSet {
    /// Run every configured attempt and keep the one with the lowest variance.
    pub fn cluster(input: &ClusterInput, settings: &KMeansSettings) -> Self {
        let mut rng = StdRng::seed_from_u64(settings.seed);
        let mut best: Option<Self> = None;

        for attempt in 0..settings.attempts.max(1) {
            let mut set = Self::begin_clustering(input, settings, &mut rng);
            let variance = set.calculate_variance(input);
            debug!(
                "K-means attempt {} settled after {} iterations (variance {}).",
                attempt, set.iterations, variance
            );

            if best.as_ref().map_or(true, |best| variance < best.variance) {
                best = Some(set);
            }
        }

        best.unwrap_or_default()
    }

    pub fn begin_clustering(input: &ClusterInput, settings: &KMeansSettings, rng: &mut StdRng) -> Self {
        if input.pose_ids.is_empty() {
            return Self::default();
        }

        let k = settings.cluster_count.clamp(1, input.pose_ids.len());
        let mut set = Self {
            clusters: match settings.fast_init {
                true => Self::initialize_clusters_fast(input, k, rng),
                false => Self::initialize_clusters(input, k, rng),
            },
            ..default()
        };

        for _ in 0..settings.max_iterations.max(1) {
            set.iterations += 1;
            if !set.process_clusters(input, settings.tolerance) {
                break;
            }
        }

        set
    }

    /// K distinct random poses.
    fn initialize_clusters_fast(input: &ClusterInput, k: usize, rng: &mut StdRng) -> Vec<KMCluster> {
        input
            .pose_ids
            .choose_multiple(rng, k)
            .map(|&pose_id| KMCluster::from_pose(input, pose_id))
            .collect()
    }

    /// Farthest point seeding from a random first pose.
    fn initialize_clusters(input: &ClusterInput, k: usize, rng: &mut StdRng) -> Vec<KMCluster> {
        let mut remaining = input.pose_ids.to_vec();
        remaining.shuffle(rng);

        let mut clusters = Vec::with_capacity(k);
        let Some(first) = remaining.pop() else {
            return clusters;
        };
        clusters.push(KMCluster::from_pose(input, first));

        while clusters.len() < k && !remaining.is_empty() {
            let mut farthest_index = 0;
            let mut farthest_cost = f32::MIN;

            for (index, &pose_id) in remaining.iter().enumerate() {
                let nearest_cost = clusters
                    .iter()
                    .map(|cluster| input.calibrated_distance(pose_id, &cluster.center))
                    .fold(f32::MAX, f32::min);

                if nearest_cost > farthest_cost {
                    farthest_cost = nearest_cost;
                    farthest_index = index;
                }
            }

            let pose_id = remaining.swap_remove(farthest_index);
            clusters.push(KMCluster::from_pose(input, pose_id));
        }

        clusters
    }

    /// Assign every pose to its cheapest cluster and recenter.
    ///
    /// Returns whether any center moved further than `tolerance`.
    fn process_clusters(&mut self, input: &ClusterInput, tolerance: f32) -> bool {
        for cluster in self.clusters.iter_mut() {
            cluster.samples.clear();
        }

        for &pose_id in input.pose_ids {
            let mut lowest_cost = f32::MAX;
            let mut lowest_cluster = 0;
            for (index, cluster) in self.clusters.iter().enumerate() {
                let cost = input.pose_cost(pose_id, &cluster.center);
                if cost < lowest_cost {
                    lowest_cost = cost;
                    lowest_cluster = index;
                }
            }

            if let Some(cluster) = self.clusters.get_mut(lowest_cluster) {
                cluster.samples.push(pose_id);
            }
        }

        let mut changed = false;
        for cluster in self.clusters.iter_mut() {
            if cluster.recalculate_center(input) > tolerance {
                changed = true;
            }
        }

        // A lone cluster owns every pose, its first mean is final.
        changed && self.clusters.len() > 1
    }

    /// Largest cluster variance of the set.
    pub fn calculate_variance(&mut self, input: &ClusterInput) -> f32 {
        self.variance = self
            .clusters
            .iter_mut()
            .map(|cluster| cluster.calculate_variance(input))
            .fold(0.0, f32::max);
        self.variance
    }
}
