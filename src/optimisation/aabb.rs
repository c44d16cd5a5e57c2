use serde::{Deserialize, Serialize};

use crate::motion_data::pose_matrix::FAVOUR_ATOM;
use crate::motion_data::search_matrix::SearchPoseMatrix;
use crate::search::cost::box_lower_bound;

pub const OUTER_CHUNK_SIZE: usize = 64;
pub const INNER_CHUNK_SIZE: usize = 16;

/// Per atom bounds of consecutive search matrix rows.
///
/// The favour atom stores the favour range of the chunk.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AabbChunk {
    /// First search matrix row.
    pub start: usize,
    /// One past the last search matrix row.
    pub end: usize,
    pub min: Vec<f32>,
    pub max: Vec<f32>,
}

impl AabbChunk {
    pub fn min_favour(&self) -> f32 {
        self.min[FAVOUR_ATOM]
    }

    /// Lower bound of the cost of every row in the chunk.
    pub fn lower_bound(&self, current: &[f32], weights: &[f32]) -> f32 {
        box_lower_bound(current, &self.min, &self.max, weights, self.min_favour())
    }
}

/// Bounding boxes over chunks of every trait section of a search matrix.
///
/// Chunks never straddle two sections.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PoseAabbMatrix {
    pub chunk_size: usize,
    pub chunks: Vec<AabbChunk>,
}

impl PoseAabbMatrix {
    pub fn new(search: &SearchPoseMatrix, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let matrix = search.matrix();
        let mut chunks = Vec::new();

        for (_, (section_start, section_end)) in search.trait_map().iter() {
            let mut start = section_start;
            while start < section_end {
                let end = (start + chunk_size).min(section_end);
                let mut chunk = AabbChunk {
                    start,
                    end,
                    min: vec![f32::MAX; matrix.atom_count()],
                    max: vec![f32::MIN; matrix.atom_count()],
                };

                for row in (start..end).filter_map(|index| matrix.row(index)) {
                    for ((min, max), &value) in chunk.min.iter_mut().zip(chunk.max.iter_mut()).zip(row) {
                        *min = min.min(value);
                        *max = max.max(value);
                    }
                }

                chunks.push(chunk);
                start = end;
            }
        }

        Self { chunk_size, chunks }
    }

    /// Chunks lying inside `[start, end)`.
    pub fn chunks_within(&self, start: usize, end: usize) -> impl Iterator<Item = &AabbChunk> {
        let first = self.chunks.partition_point(|chunk| chunk.start < start);
        self.chunks[first..]
            .iter()
            .take_while(move |chunk| chunk.end <= end)
    }
}

/// Two level bounding box hierarchy, outer chunks refined by inner chunks.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PoseAabbTree {
    pub outer: PoseAabbMatrix,
    pub inner: PoseAabbMatrix,
}

impl PoseAabbTree {
    pub fn new(search: &SearchPoseMatrix) -> Self {
        Self {
            outer: PoseAabbMatrix::new(search, OUTER_CHUNK_SIZE),
            inner: PoseAabbMatrix::new(search, INNER_CHUNK_SIZE),
        }
    }

    /// Lowest cost search matrix row within `[start, end)` that is strictly cheaper
    /// than `lowest`, pruning chunks that cannot beat the running minimum.
    ///
    /// Yields the same row as a linear scan of the section.
    pub fn lowest_cost(
        &self,
        search: &SearchPoseMatrix,
        (start, end): (usize, usize),
        current: &[f32],
        weights: &[f32],
        mut lowest: Option<f32>,
        mut cost_of: impl FnMut(&[f32]) -> f32,
    ) -> Option<(f32, usize)> {
        let mut best = None;
        let pruned = |lowest: Option<f32>, bound: f32| lowest.is_some_and(|lowest| bound >= lowest);

        for outer in self.outer.chunks_within(start, end) {
            if pruned(lowest, outer.lower_bound(current, weights)) {
                continue;
            }

            for inner in self.inner.chunks_within(outer.start, outer.end) {
                if pruned(lowest, inner.lower_bound(current, weights)) {
                    continue;
                }

                for index in inner.start..inner.end {
                    let Some(row) = search.matrix().row(index) else {
                        continue;
                    };
                    let cost = cost_of(row);
                    if lowest.map_or(true, |lowest| cost < lowest) {
                        lowest = Some(cost);
                        best = Some((cost, index));
                    }
                }
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion_data::pose::{MotionTraits, PoseSearchFlag};
    use crate::motion_data::pose_matrix::PoseMatrix;
    use crate::motion_data::search_matrix::PoseMatrixPose;
    use crate::search::cost::pose_cost;

    fn search_matrix(pose_count: usize) -> SearchPoseMatrix {
        let mut lookup = PoseMatrix::new(pose_count, 3);
        for pose_id in 0..pose_count {
            let row = lookup.row_mut(pose_id).unwrap();
            let x = pose_id as f32;
            row[0] = 1.0 + (pose_id % 3) as f32 * 0.25;
            row[1] = (x * 0.37).sin() * 10.0;
            row[2] = x * 0.1;
        }

        let poses: Vec<_> = (0..pose_count)
            .map(|pose_id| PoseMatrixPose {
                pose_id,
                traits: MotionTraits(u64::from(pose_id >= pose_count / 2)),
                flag: PoseSearchFlag::Searchable,
            })
            .collect();

        SearchPoseMatrix::generate(&lookup, &poses, &[MotionTraits(0), MotionTraits(1)])
    }

    #[test]
    fn chunks_stay_inside_sections() {
        let search = search_matrix(100);
        let aabb = PoseAabbMatrix::new(&search, 16);

        let (_, split) = search.trait_map().section(MotionTraits(0)).unwrap();
        assert!(aabb.chunks.iter().all(|c| c.end <= split || c.start >= split));
        assert_eq!(aabb.chunks.iter().map(|c| c.end - c.start).sum::<usize>(), 100);
    }

    #[test]
    fn pruned_search_matches_linear_scan() {
        let search = search_matrix(300);
        let tree = PoseAabbTree::new(&search);
        let weights = [1.0, 2.0];

        for target in [0.0, 3.3, -7.5, 9.9] {
            let current = [1.0, target, 12.0];
            for traits in [MotionTraits(0), MotionTraits(1)] {
                let section = search.trait_map().section(traits).unwrap();

                let mut linear: Option<(f32, usize)> = None;
                for index in section.0..section.1 {
                    let cost = pose_cost(search.matrix().row(index).unwrap(), &current, &weights);
                    if linear.map_or(true, |(lowest, _)| cost < lowest) {
                        linear = Some((cost, index));
                    }
                }

                let pruned = tree.lowest_cost(&search, section, &current, &weights, None, |row| {
                    pose_cost(row, &current, &weights)
                });
                assert_eq!(pruned.map(|(_, index)| index), linear.map(|(_, index)| index));
            }
        }
    }
}
