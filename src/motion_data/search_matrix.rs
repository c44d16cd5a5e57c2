use serde::{Deserialize, Serialize};

use super::chunk::ChunkOffsets;
use super::pose::{MotionTraits, PoseMotionData, PoseSearchFlag};
use super::pose_matrix::PoseMatrix;

/// `[start, end)` search matrix section of every motion trait combination.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TraitMatrixMap {
    traits: Vec<MotionTraits>,
    offsets: ChunkOffsets,
}

impl TraitMatrixMap {
    /// Section of the search matrix holding poses of exactly `traits`.
    pub fn section(&self, traits: MotionTraits) -> Option<(usize, usize)> {
        let index = self.traits.iter().position(|t| *t == traits)?;
        self.offsets.get_chunk(index)
    }

    /// Traits owning a search matrix row.
    pub fn traits_of(&self, matrix_index: usize) -> Option<MotionTraits> {
        let chunk = self.offsets.find_chunk(matrix_index)?;
        self.traits.get(chunk).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MotionTraits, (usize, usize))> + '_ {
        self.traits.iter().copied().zip(self.offsets.iter())
    }
}

/// Searchable projection of the lookup [`PoseMatrix`].
///
/// Only [`PoseSearchFlag::Searchable`] poses are copied, grouped contiguously per motion
/// trait so a search can be scoped to one section without per-row branching.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SearchPoseMatrix {
    matrix: PoseMatrix,
    /// Matrix index -> database pose id.
    pose_id_remap: Vec<usize>,
    /// Database pose id -> matrix index.
    pose_id_remap_reverse: Vec<Option<usize>>,
    trait_map: TraitMatrixMap,
}

impl SearchPoseMatrix {
    /// Filter the lookup matrix into a search matrix.
    ///
    /// `used_traits` decides the section order.
    pub fn generate(
        lookup: &PoseMatrix,
        poses: &[PoseMatrixPose],
        used_traits: &[MotionTraits],
    ) -> Self {
        let mut pose_id_remap = Vec::new();
        let mut pose_id_remap_reverse = vec![None; poses.len()];
        let mut trait_map = TraitMatrixMap::default();

        for &traits in used_traits {
            let start = pose_id_remap.len();
            for pose in poses
                .iter()
                .filter(|pose| pose.traits == traits && pose.flag == PoseSearchFlag::Searchable)
            {
                pose_id_remap_reverse[pose.pose_id] = Some(pose_id_remap.len());
                pose_id_remap.push(pose.pose_id);
            }

            trait_map.traits.push(traits);
            trait_map.offsets.push_chunk(pose_id_remap.len() - start);
        }

        let matrix = PoseMatrix::from_rows(
            lookup.atom_count(),
            pose_id_remap.iter().filter_map(|&pose_id| lookup.row(pose_id)),
        );

        Self {
            matrix,
            pose_id_remap,
            pose_id_remap_reverse,
            trait_map,
        }
    }

    pub fn matrix_to_database(&self, matrix_index: usize) -> Option<usize> {
        self.pose_id_remap.get(matrix_index).copied()
    }

    pub fn database_to_matrix(&self, pose_id: usize) -> Option<usize> {
        self.pose_id_remap_reverse.get(pose_id).copied().flatten()
    }

    pub fn matrix(&self) -> &PoseMatrix {
        &self.matrix
    }

    pub fn trait_map(&self) -> &TraitMatrixMap {
        &self.trait_map
    }

    pub fn len(&self) -> usize {
        self.pose_id_remap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pose_id_remap.is_empty()
    }
}

/// The subset of a pose record the search matrix is generated from.
#[derive(Debug, Clone, Copy)]
pub struct PoseMatrixPose {
    pub pose_id: usize,
    pub traits: MotionTraits,
    pub flag: PoseSearchFlag,
}

impl From<&PoseMotionData> for PoseMatrixPose {
    fn from(pose: &PoseMotionData) -> Self {
        Self {
            pose_id: pose.pose_id,
            traits: pose.traits,
            flag: pose.search_flag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(pose_id: usize, traits: u64, flag: PoseSearchFlag) -> PoseMatrixPose {
        PoseMatrixPose {
            pose_id,
            traits: MotionTraits(traits),
            flag,
        }
    }

    #[test]
    fn sections_are_contiguous_per_trait() {
        let mut lookup = PoseMatrix::new(5, 2);
        for i in 0..5 {
            lookup.row_mut(i).unwrap()[1] = i as f32;
        }

        let poses = [
            pose(0, 1, PoseSearchFlag::Searchable),
            pose(1, 0, PoseSearchFlag::Searchable),
            pose(2, 1, PoseSearchFlag::DoNotUse),
            pose(3, 1, PoseSearchFlag::Searchable),
            pose(4, 0, PoseSearchFlag::EdgePose),
        ];
        let search =
            SearchPoseMatrix::generate(&lookup, &poses, &[MotionTraits(0), MotionTraits(1)]);

        assert_eq!(search.len(), 3);
        assert_eq!(search.trait_map().section(MotionTraits(0)), Some((0, 1)));
        assert_eq!(search.trait_map().section(MotionTraits(1)), Some((1, 3)));
        assert_eq!(search.trait_map().traits_of(2), Some(MotionTraits(1)));
        assert_eq!(search.matrix().row(2), Some(&[1.0, 3.0][..]));

        for x in 0..search.len() {
            let pose_id = search.matrix_to_database(x).unwrap();
            assert_eq!(search.database_to_matrix(pose_id), Some(x));
        }
        assert_eq!(search.database_to_matrix(2), None);
    }
}
