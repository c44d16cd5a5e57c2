//! Offline acceleration structures of the pose search.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::motion_data::motion_database::MotionDatabase;
use crate::motion_data::pose::{MotionTraits, PoseSearchFlag};
use crate::motion_data::trait_map::TraitMap;
use crate::telemetry::PreprocessProgress;
use kmeans::{ClusterInput, KMeansClusteringSet, KMeansSettings};
use lookup_table::{LookupTableInput, PoseLookupTable};

pub mod aabb;
pub mod kmeans;
pub mod lookup_table;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MultiClusteringSettings {
    pub kmeans: KMeansSettings,
    /// Candidate sets are merged until at most this many remain per trait.
    pub desired_lookup_table_size: usize,
    /// Sets holding this many candidates are never merged further.
    pub max_lookup_column_size: usize,
}

impl Default for MultiClusteringSettings {
    fn default() -> Self {
        Self {
            kmeans: KMeansSettings::default(),
            desired_lookup_table_size: 100,
            max_lookup_column_size: 100,
        }
    }
}

/// Per trait lookup tables mapping every pose to a small set of candidate poses.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MultiClustering {
    pose_lookup_sets: TraitMap<PoseLookupTable>,
}

impl MultiClustering {
    /// Cluster every trait partition of `database`.
    ///
    /// Returns the candidate set index assigned to each pose.
    pub fn build(
        database: &MotionDatabase,
        settings: &MultiClusteringSettings,
        progress: &mut dyn PreprocessProgress,
    ) -> (Self, Vec<(usize, usize)>) {
        let matrix = database.lookup_matrix();
        let trajectory_atoms = database.trajectory_atoms();
        if trajectory_atoms.is_empty() {
            warn!("No trajectory feature to cluster on, poses are clustered on nothing.");
        }

        let used_traits: Vec<_> = database.used_traits().collect();
        let mut pose_lookup_sets = TraitMap::new();
        let mut assignments = Vec::new();

        for (index, &traits) in used_traits.iter().enumerate() {
            progress.enter_frame(
                &format!("Clustering traits {:#x}", traits.0),
                index as f32 / used_traits.len() as f32,
            );

            let Some(calibration) = database.final_calibration(traits) else {
                continue;
            };

            let pose_ids: Vec<_> = database
                .poses()
                .iter()
                .filter(|pose| pose.traits == traits && pose.search_flag != PoseSearchFlag::DoNotUse)
                .map(|pose| pose.pose_id)
                .collect();

            let input = ClusterInput {
                matrix,
                pose_ids: &pose_ids,
                trajectory_atoms: &trajectory_atoms,
                weights: calibration.weights(),
            };
            let clusters = KMeansClusteringSet::cluster(&input, &settings.kmeans);
            info!(
                "Clustered {} poses into {} clusters (variance {}).",
                pose_ids.len(),
                clusters.clusters.len(),
                clusters.variance
            );

            let table_input = LookupTableInput {
                matrix,
                pose_ids: &pose_ids,
                clusters: &clusters,
                weights: calibration.weights(),
                desired_size: settings.desired_lookup_table_size,
                max_column_size: settings.max_lookup_column_size,
            };
            let (table, table_assignments) = PoseLookupTable::process(&table_input, |pose_id| {
                database
                    .pose(pose_id)
                    .is_some_and(|pose| pose.search_flag == PoseSearchFlag::Searchable)
            });

            pose_lookup_sets.insert(traits, table);
            assignments.extend(table_assignments);
        }

        progress.enter_frame("Clustering complete", 1.0);
        (Self { pose_lookup_sets }, assignments)
    }

    /// Candidate poses to search from `current_pose`.
    ///
    /// [`None`] when the pose belongs to another trait partition or has no candidate
    /// set, in which case the whole partition has to be searched.
    pub fn candidates(
        &self,
        database: &MotionDatabase,
        current_pose: usize,
        required_traits: MotionTraits,
    ) -> Option<&[usize]> {
        let pose = database.pose(current_pose)?;
        if pose.traits != required_traits {
            return None;
        }

        let set = self
            .pose_lookup_sets
            .get(required_traits)?
            .get(pose.candidate_set_id?)?;
        Some(&set.candidates)
    }

    pub fn lookup_table(&self, traits: MotionTraits) -> Option<&PoseLookupTable> {
        self.pose_lookup_sets.get(traits)
    }
}
