//! Authoring configuration of a motion database and runtime settings of a node.

use serde::{Deserialize, Serialize};

use crate::error::SetupError;
use crate::feature::{FeatureLayout, MatchFeature};

/// Smallest pose interval accepted by preprocessing.
pub const MIN_POSE_INTERVAL: f32 = 0.01;

fn default_pose_interval() -> f32 {
    0.1
}

/// Describes which features are matched and how poses are sampled.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MotionMatchConfig {
    pub features: Vec<MatchFeature>,
    /// Time in seconds between two sampled poses.
    #[serde(default = "default_pose_interval")]
    pub pose_interval: f32,
    #[serde(default)]
    pub mirror_profile: MirrorProfile,
}

impl MotionMatchConfig {
    pub fn new(features: Vec<MatchFeature>) -> Self {
        Self {
            features,
            pose_interval: default_pose_interval(),
            mirror_profile: MirrorProfile::default(),
        }
    }

    pub fn with_pose_interval(mut self, pose_interval: f32) -> Self {
        self.pose_interval = pose_interval;
        self
    }

    pub fn with_mirror_profile(mut self, mirror_profile: MirrorProfile) -> Self {
        self.mirror_profile = mirror_profile;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Pose interval clamped to [`MIN_POSE_INTERVAL`].
    pub fn pose_interval(&self) -> f32 {
        self.pose_interval.max(MIN_POSE_INTERVAL)
    }

    pub fn layout(&self) -> FeatureLayout {
        FeatureLayout::new(&self.features)
    }

    /// Number of weighted atoms, the expected calibration length.
    pub fn total_feature_atoms(&self) -> usize {
        self.features.iter().map(MatchFeature::size).sum()
    }

    /// Check that every feature can be evaluated.
    pub fn validate(&self) -> Result<(), SetupError> {
        for (index, feature) in self.features.iter().enumerate() {
            feature
                .evaluator()
                .validate()
                .map_err(|reason| SetupError::InvalidFeature { index, reason })?;

            if feature.size() == 0 {
                return Err(SetupError::InvalidFeature {
                    index,
                    reason: "feature has no atoms".into(),
                });
            }
        }

        Ok(())
    }
}

/// Left/right bone name pairs used when evaluating mirrored poses.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MirrorProfile {
    pub pairs: Vec<(String, String)>,
}

impl MirrorProfile {
    pub fn with_pair(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.pairs.push((left.into(), right.into()));
        self
    }

    /// Mirror counterpart of a bone, the bone itself if it has none.
    ///
    /// ```
    /// use bevy_motion_matching_core::config::MirrorProfile;
    ///
    /// let profile = MirrorProfile::default().with_pair("foot_l", "foot_r");
    /// assert_eq!(profile.mirror_bone("foot_r"), "foot_l");
    /// assert_eq!(profile.mirror_bone("spine"), "spine");
    /// ```
    pub fn mirror_bone<'a>(&'a self, bone: &'a str) -> &'a str {
        self.pairs
            .iter()
            .find_map(|(left, right)| {
                if bone == left.as_str() {
                    Some(right.as_str())
                } else if bone == right.as_str() {
                    Some(left.as_str())
                } else {
                    None
                }
            })
            .unwrap_or(bone)
    }
}

/// How a search is narrowed down.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PoseMatchMethod {
    /// Candidate sets of the pose lookup table.
    #[default]
    Optimized,
    /// Bounding box pruned scan.
    Aabb,
    /// Every searchable pose.
    Linear,
}

/// How a node moves to a newly chosen pose.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TransitionMethod {
    /// Jump without blending.
    None,
    /// Cross fade blend channels.
    Blend,
    /// Jump and let the host engine inertialize.
    #[default]
    Inertialization,
}

/// Source of the past trajectory atoms of the desired input.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PastTrajectoryMode {
    /// Provided by the caller.
    #[default]
    ActualHistory,
    /// Taken from the current interpolated pose.
    CopyFromCurrentPose,
}

/// Runtime options of a motion matching node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MotionMatchingSettings {
    /// Seconds between two searches.
    pub update_interval: f32,
    pub playback_rate: f32,
    pub blend_time: f32,
    pub pose_match_method: PoseMatchMethod,
    pub transition_method: TransitionMethod,
    pub past_trajectory_mode: PastTrajectoryMode,
    pub apply_trajectory_blending: bool,
    pub trajectory_blend_magnitude: f32,
    pub favour_current_pose: bool,
    pub current_pose_favour: f32,
    pub next_pose_tolerance_test: bool,
    pub position_tolerance: f32,
    pub rotation_tolerance: f32,
    /// Quality vs responsiveness ratio used instead of the authored one.
    pub override_quality_vs_responsiveness: Option<f32>,
    pub favour_next_natural: bool,
    pub next_natural_favour: f32,
    /// Seconds past the current pose examined by the next natural search.
    pub next_natural_range: f32,
    /// Force a search one blend time before a non looping clip ends.
    pub blend_out_early: bool,
}

impl Default for MotionMatchingSettings {
    fn default() -> Self {
        Self {
            update_interval: 0.1,
            playback_rate: 1.0,
            blend_time: 0.3,
            pose_match_method: PoseMatchMethod::Optimized,
            transition_method: TransitionMethod::Inertialization,
            past_trajectory_mode: PastTrajectoryMode::ActualHistory,
            apply_trajectory_blending: false,
            trajectory_blend_magnitude: 1.0,
            favour_current_pose: false,
            current_pose_favour: 0.95,
            next_pose_tolerance_test: true,
            position_tolerance: 50.0,
            rotation_tolerance: 2.0,
            override_quality_vs_responsiveness: None,
            favour_next_natural: false,
            next_natural_favour: 0.8,
            next_natural_range: 0.3,
            blend_out_early: true,
        }
    }
}

impl MotionMatchingSettings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{BoneLocation, FeatureKind, Trajectory2D};

    #[test]
    fn settings_fill_missing_fields_with_defaults() {
        let settings = MotionMatchingSettings::from_json(r#"{ "blend_time": 0.2 }"#).unwrap();

        assert_eq!(settings.blend_time, 0.2);
        assert_eq!(settings.update_interval, 0.1);
        assert_eq!(settings.pose_match_method, PoseMatchMethod::Optimized);
        assert_eq!(settings.transition_method, TransitionMethod::Inertialization);
        assert_eq!(settings.override_quality_vs_responsiveness, None);
    }

    #[test]
    fn validate_reports_feature_index() {
        let config = MotionMatchConfig::new(vec![
            MatchFeature::new(FeatureKind::Trajectory2D(Trajectory2D::new(vec![0.5]))),
            MatchFeature::new(FeatureKind::BoneLocation(BoneLocation::new(""))),
        ]);

        assert!(matches!(
            config.validate(),
            Err(SetupError::InvalidFeature { index: 1, .. })
        ));
    }

    #[test]
    fn pose_interval_is_clamped() {
        let config = MotionMatchConfig::new(Vec::new()).with_pose_interval(0.0);
        assert_eq!(config.pose_interval(), MIN_POSE_INTERVAL);
    }
}
