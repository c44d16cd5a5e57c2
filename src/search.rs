//! Cost based nearest neighbour search over a [`MotionDatabase`].

use crate::config::PoseMatchMethod;
use crate::feature::FeatureCategory;
use crate::motion_data::motion_database::MotionDatabase;
use crate::motion_data::pose::{AnimKind, MotionTraits, PoseMotionData, PoseSearchFlag};
use cost::pose_cost;

pub mod cost;

/// Winners closer in time than this to the playing pose do not transition.
pub const SAME_LOCATION_TIME: f32 = 0.25;

/// Squared blend space distance under which two blend space poses are the same location.
pub const SAME_LOCATION_BLEND_SPACE_SQR: f32 = 1.0;

/// Lowest cost found so far, as `(cost, database pose id)`.
pub type SearchResult = Option<(f32, usize)>;

/// One search, seen from the current interpolated pose.
pub struct PoseSearch<'a> {
    database: &'a MotionDatabase,
    /// Current pose row, atom `0` is expected to be `1`.
    current: &'a [f32],
    /// Calibration of `required_traits`, indexed by `atom - 1`.
    weights: &'a [f32],
    required_traits: MotionTraits,
}

impl<'a> PoseSearch<'a> {
    pub fn new(
        database: &'a MotionDatabase,
        current: &'a [f32],
        weights: &'a [f32],
        required_traits: MotionTraits,
    ) -> Self {
        Self {
            database,
            current,
            weights,
            required_traits,
        }
    }

    /// Cost of any database pose, searchable or not.
    pub fn pose_cost(&self, pose_id: usize) -> Option<f32> {
        let row = self.database.lookup_matrix().row(pose_id)?;
        Some(pose_cost(row, self.current, self.weights))
    }

    /// Cost of the current pose scaled by `favour`, the minimum to beat when favouring it.
    pub fn favour_current_pose(&self, pose_id: usize, favour: f32) -> SearchResult {
        self.pose_cost(pose_id).map(|cost| (cost * favour, pose_id))
    }

    /// Cheapest pose naturally following `current` within `range` seconds.
    ///
    /// The scan stops at the first unusable pose or at a clip change.
    pub fn next_natural_lowest_cost(
        &self,
        current: &PoseMotionData,
        range: f32,
        favour: f32,
        mut lowest: SearchResult,
    ) -> SearchResult {
        let pose_count = (range / self.database.pose_interval()).floor() as usize;
        let start = current.pose_id + 1;
        let end = (current.pose_id + pose_count).min(self.database.pose_count().saturating_sub(1));

        for pose_id in start..=end {
            let Some(pose) = self.database.pose(pose_id) else {
                break;
            };
            if !pose.search_flag.is_usable()
                || pose.anim_id != current.anim_id
                || pose.anim_kind != current.anim_kind
            {
                break;
            }

            let Some(cost) = self.pose_cost(pose_id) else {
                break;
            };
            let cost = cost * favour;
            if lowest.map_or(true, |(lowest, _)| cost < lowest) {
                lowest = Some((cost, pose_id));
            }
        }

        lowest
    }

    /// Scan the whole trait section of the search matrix.
    pub fn linear(&self, lowest: SearchResult) -> SearchResult {
        let Some((start, end)) = self.section() else {
            return lowest;
        };
        self.scan_matrix(start..end, lowest)
    }

    /// Scan a candidate list of database pose ids.
    ///
    /// Poses missing from the search matrix are skipped.
    pub fn candidates(&self, candidates: &[usize], lowest: SearchResult) -> SearchResult {
        let indices = candidates
            .iter()
            .filter_map(|&pose_id| self.database.database_to_matrix(pose_id));
        self.scan_matrix(indices, lowest)
    }

    /// Scan the trait section through its bounding boxes.
    pub fn aabb(&self, lowest: SearchResult) -> SearchResult {
        let Some(section) = self.section() else {
            return lowest;
        };

        let search = self.database.search_matrix();
        let found = self.database.aabb().lowest_cost(
            search,
            section,
            self.current,
            self.weights,
            lowest.map(|(cost, _)| cost),
            |row| pose_cost(row, self.current, self.weights),
        );

        match found {
            Some((cost, index)) => search
                .matrix_to_database(index)
                .map(|pose_id| (cost, pose_id))
                .or(lowest),
            None => lowest,
        }
    }

    /// Search with `method`, falling back to a linear scan without candidates.
    pub fn lowest_cost(
        &self,
        method: PoseMatchMethod,
        current_pose: usize,
        lowest: SearchResult,
    ) -> SearchResult {
        match method {
            PoseMatchMethod::Linear => self.linear(lowest),
            PoseMatchMethod::Aabb => self.aabb(lowest),
            PoseMatchMethod::Optimized => {
                let candidates = self.database.optimisation().and_then(|optimisation| {
                    optimisation.candidates(self.database, current_pose, self.required_traits)
                });

                match candidates {
                    Some(candidates) if !candidates.is_empty() => self.candidates(candidates, lowest),
                    _ => self.linear(lowest),
                }
            }
        }
    }

    fn section(&self) -> Option<(usize, usize)> {
        self.database
            .search_matrix()
            .trait_map()
            .section(self.required_traits)
    }

    fn scan_matrix(
        &self,
        indices: impl IntoIterator<Item = usize>,
        mut lowest: SearchResult,
    ) -> SearchResult {
        let search = self.database.search_matrix();
        for index in indices {
            let Some(row) = search.matrix().row(index) else {
                continue;
            };

            let cost = pose_cost(row, self.current, self.weights);
            if lowest.map_or(true, |(lowest, _)| cost < lowest) {
                if let Some(pose_id) = search.matrix_to_database(index) {
                    lowest = Some((cost, pose_id));
                }
            }
        }
        lowest
    }
}

/// Whether `next` already satisfies the desired input, so no search is needed.
///
/// `desired` excludes the favour atom.
pub fn next_pose_tolerance_test(
    database: &MotionDatabase,
    next: &PoseMotionData,
    required_traits: MotionTraits,
    desired: &[f32],
    position_tolerance: f32,
    rotation_tolerance: f32,
) -> bool {
    if next.search_flag == PoseSearchFlag::DoNotUse || next.traits != required_traits {
        return false;
    }

    let Some(row) = database.lookup_matrix().row(next.pose_id) else {
        return false;
    };

    let layout = database.layout();
    database
        .features()
        .iter()
        .enumerate()
        .filter(|(_, feature)| feature.category() == FeatureCategory::Responsiveness)
        .all(|(index, feature)| {
            let (Some(input), Some(matrix)) = (layout.input_range(index), layout.feature_range(index))
            else {
                return true;
            };
            let Some(desired) = desired.get(input) else {
                return true;
            };

            feature.evaluator().next_pose_tolerance_test(
                desired,
                &row[matrix],
                position_tolerance,
                rotation_tolerance,
            )
        })
}

/// Whether transitioning from `a` to `b` would land on the pose already playing.
///
/// ```
/// use bevy_motion_matching_core::motion_data::pose::PoseMotionData;
/// use bevy_motion_matching_core::search::is_same_location;
///
/// let a = PoseMotionData { anim_id: 2, time: 1.0, ..Default::default() };
/// let b = PoseMotionData { anim_id: 2, time: 1.2, ..Default::default() };
/// let c = PoseMotionData { anim_id: 2, time: 1.3, ..Default::default() };
///
/// assert!(is_same_location(&a, &b));
/// assert!(!is_same_location(&a, &c));
/// ```
pub fn is_same_location(a: &PoseMotionData, b: &PoseMotionData) -> bool {
    let same_blend_position = match a.anim_kind == AnimKind::BlendSpace {
        true => {
            a.blend_space_position
                .distance_squared(b.blend_space_position)
                < SAME_LOCATION_BLEND_SPACE_SQR
        }
        false => true,
    };

    a.anim_id == b.anim_id
        && a.mirrored == b.mirrored
        && (a.time - b.time).abs() < SAME_LOCATION_TIME
        && same_blend_position
}

/// Whether playback from `current` runs into unusable data within `blend_time`.
pub fn must_force_search(database: &MotionDatabase, current: &PoseMotionData, blend_time: f32) -> bool {
    let pose_count = (blend_time / database.pose_interval()).ceil() as usize;
    let check_end = current.pose_id + pose_count;
    if check_end >= database.pose_count() {
        return true;
    }

    database.poses()[current.pose_id..check_end].iter().any(|pose| {
        pose.search_flag == PoseSearchFlag::DoNotUse
            || pose.anim_id != current.anim_id
            || pose.anim_kind != current.anim_kind
    })
}
