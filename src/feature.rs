//! Match features: the quantities every pose row is made of.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::config::MirrorProfile;
use crate::motion_data::motion_clip::MotionClip;
use crate::motion_data::pose_matrix::FAVOUR_ATOM;
use crate::sampler::{ClipRef, MotionSnapshot, PoseSampler};

pub mod bone;
pub mod distance;
pub mod momentum;
pub mod trajectory;

pub use bone::{BoneFacing, BoneHeight, BoneLocation, BoneVelocity};
pub use distance::{DistanceMatchType, DistanceToMarker};
pub use momentum::{BodyMomentum2D, BodyMomentumRot};
pub use trajectory::Trajectory2D;

/// Which side of the quality vs responsiveness trade-off a feature is weighted on.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureCategory {
    /// Continuity with the current pose.
    #[default]
    Quality,
    /// Reaction to the desired input.
    Responsiveness,
}

/// Everything a feature needs to evaluate itself on one pose during preprocessing.
pub struct PreprocessSample<'a> {
    pub sampler: &'a dyn PoseSampler,
    pub clip: &'a MotionClip,
    pub clip_ref: ClipRef,
    pub time: f32,
    pub pose_interval: f32,
    pub mirrored: bool,
    pub mirror_profile: &'a MirrorProfile,
}

impl PreprocessSample<'_> {
    /// Bone name to sample, swapped to its mirror counterpart on mirrored poses.
    pub fn bone<'b>(&'b self, bone: &'b str) -> &'b str {
        match self.mirrored {
            true => self.mirror_profile.mirror_bone(bone),
            false => bone,
        }
    }

    /// Negate the lateral axis on mirrored poses.
    #[inline]
    pub fn mirror_x(&self, x: f32) -> f32 {
        match self.mirrored {
            true => -x,
            false => x,
        }
    }
}

/// Common capability of every feature.
///
/// All slices handed to a feature are already narrowed down to its own atoms.
pub trait FeatureEvaluator {
    /// Number of atoms written per pose.
    fn size(&self) -> usize;

    fn default_category(&self) -> FeatureCategory {
        FeatureCategory::Quality
    }

    /// Describe why the feature cannot be used, if it cannot.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Evaluate the feature from source animation data.
    ///
    /// `out` is zero filled beforehand, atoms that cannot be sampled may be left alone.
    fn evaluate_preprocess(&self, out: &mut [f32], sample: &PreprocessSample<'_>);

    /// Used by trajectory clustering.
    fn is_trajectory(&self) -> bool {
        false
    }

    fn is_snapshot_compatible(&self) -> bool {
        false
    }

    /// Overwrite `out` with values captured from a live skeleton.
    ///
    /// Returns false when nothing was written.
    fn extract_runtime(&self, _out: &mut [f32], _snapshot: &dyn MotionSnapshot) -> bool {
        false
    }

    /// Blend the desired input towards the current pose.
    fn apply_input_blending(&self, _desired: &mut [f32], _current: &[f32], _weight: f32) {}

    /// Whether `row` is close enough to the desired input to skip a search.
    fn next_pose_tolerance_test(
        &self,
        _desired: &[f32],
        _row: &[f32],
        _position_tolerance: f32,
        _rotation_tolerance: f32,
    ) -> bool {
        true
    }

    /// Accumulate the squared distance of `row` to `mean` for standard deviations.
    fn accumulate_distance_to_mean(&self, out: &mut [f32], mean: &[f32], row: &[f32]) {
        for ((out, mean), value) in out.iter_mut().zip(mean).zip(row) {
            let distance = value - mean;
            *out += distance * distance;
        }
    }

    /// Replace historical atoms of the desired input with those of the current pose.
    fn copy_past_from_current(&self, _desired: &mut [f32], _current: &[f32]) {}
}

/// Closed set of feature kinds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum FeatureKind {
    Trajectory2D(Trajectory2D),
    BoneLocation(BoneLocation),
    BoneVelocity(BoneVelocity),
    BoneFacing(BoneFacing),
    BoneHeight(BoneHeight),
    BodyMomentum2D(BodyMomentum2D),
    BodyMomentumRot(BodyMomentumRot),
    DistanceToMarker(DistanceToMarker),
}

fn default_weight() -> f32 {
    1.0
}

/// A configured feature.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MatchFeature {
    pub kind: FeatureKind,
    /// Category override, defaults to the kind's own category.
    #[serde(default)]
    pub category: Option<FeatureCategory>,
    #[serde(default = "default_weight")]
    pub default_weight: f32,
}

impl MatchFeature {
    pub fn new(kind: FeatureKind) -> Self {
        Self {
            kind,
            category: None,
            default_weight: 1.0,
        }
    }

    pub fn with_category(mut self, category: FeatureCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.default_weight = weight;
        self
    }

    pub fn evaluator(&self) -> &dyn FeatureEvaluator {
        match &self.kind {
            FeatureKind::Trajectory2D(f) => f,
            FeatureKind::BoneLocation(f) => f,
            FeatureKind::BoneVelocity(f) => f,
            FeatureKind::BoneFacing(f) => f,
            FeatureKind::BoneHeight(f) => f,
            FeatureKind::BodyMomentum2D(f) => f,
            FeatureKind::BodyMomentumRot(f) => f,
            FeatureKind::DistanceToMarker(f) => f,
        }
    }

    pub fn size(&self) -> usize {
        self.evaluator().size()
    }

    pub fn category(&self) -> FeatureCategory {
        self.category
            .unwrap_or_else(|| self.evaluator().default_category())
    }

    /// Default user weight of one of the feature's atoms.
    pub fn default_weight(&self, _atom: usize) -> f32 {
        self.default_weight
    }
}

impl From<FeatureKind> for MatchFeature {
    fn from(kind: FeatureKind) -> Self {
        Self::new(kind)
    }
}

/// Atom offsets of an ordered feature list, computed once.
///
/// Atom [`FAVOUR_ATOM`] is reserved, so the first feature starts at atom `1`.
///
/// ```
/// use bevy_motion_matching_core::feature::*;
///
/// let features = [
///     MatchFeature::new(FeatureKind::Trajectory2D(Trajectory2D::new(vec![-0.5, 0.5, 1.0]))),
///     MatchFeature::new(FeatureKind::BoneHeight(BoneHeight::new("pelvis"))),
/// ];
/// let layout = FeatureLayout::new(&features);
///
/// assert_eq!(layout.atom_count(), 14);
/// assert_eq!(layout.feature_range(0), Some(1..13));
/// assert_eq!(layout.feature_range(1), Some(13..14));
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FeatureLayout {
    offsets: Vec<usize>,
    sizes: Vec<usize>,
    categories: Vec<FeatureCategory>,
    atom_count: usize,
}

impl FeatureLayout {
    pub fn new(features: &[MatchFeature]) -> Self {
        let mut layout = Self {
            atom_count: FAVOUR_ATOM + 1,
            ..Self::default()
        };

        for feature in features {
            let size = feature.size();
            layout.offsets.push(layout.atom_count);
            layout.sizes.push(size);
            layout
                .categories
                .extend(std::iter::repeat(feature.category()).take(size));
            layout.atom_count += size;
        }

        layout
    }

    /// Total atoms per pose row, favour included.
    pub fn atom_count(&self) -> usize {
        self.atom_count
    }

    /// Atoms per pose row excluding favour, also the calibration length.
    pub fn feature_atom_count(&self) -> usize {
        self.atom_count - 1
    }

    pub fn feature_count(&self) -> usize {
        self.offsets.len()
    }

    /// Matrix atom range of a feature.
    pub fn feature_range(&self, feature_index: usize) -> Option<Range<usize>> {
        let offset = *self.offsets.get(feature_index)?;
        Some(offset..offset + self.sizes[feature_index])
    }

    /// Range of a feature inside arrays that exclude the favour atom
    /// (desired input and calibration).
    pub fn input_range(&self, feature_index: usize) -> Option<Range<usize>> {
        let range = self.feature_range(feature_index)?;
        Some(range.start - 1..range.end - 1)
    }

    /// Category of a matrix atom, [`None`] for the favour atom.
    pub fn atom_category(&self, atom: usize) -> Option<FeatureCategory> {
        self.categories.get(atom.checked_sub(1)?).copied()
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.offsets
            .iter()
            .zip(&self.sizes)
            .map(|(&offset, &size)| offset..offset + size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_categories_follow_features() {
        let features = [
            MatchFeature::new(FeatureKind::BoneLocation(BoneLocation::new("foot_l"))),
            MatchFeature::new(FeatureKind::Trajectory2D(Trajectory2D::new(vec![0.5]))),
        ];
        let layout = FeatureLayout::new(&features);

        assert_eq!(layout.atom_count(), 8);
        assert_eq!(layout.atom_category(0), None);
        assert_eq!(layout.atom_category(1), Some(FeatureCategory::Quality));
        assert_eq!(layout.atom_category(4), Some(FeatureCategory::Responsiveness));
        assert_eq!(layout.input_range(1), Some(3..7));
    }

    #[test]
    fn feature_json_round_trips_through_config() {
        let json = r#"{
            "kind": { "type": "Trajectory2D", "timings": [-0.3, 0.3, 0.6] },
            "default_weight": 2.0
        }"#;
        let feature: MatchFeature = serde_json::from_str(json).unwrap();

        assert_eq!(feature.size(), 12);
        assert_eq!(feature.category(), FeatureCategory::Responsiveness);
        assert_eq!(feature.default_weight(0), 2.0);
    }
}
