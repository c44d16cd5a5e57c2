use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::pose::{AnimKind, MotionTraits};
use crate::sampler::ClipRef;

/// How trajectory points that fall outside of a clip are treated during preprocessing.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TrajectoryPreprocessMethod {
    /// Clamp to the clip and exclude poses close to the edge from searching.
    #[default]
    IgnoreEdges,
    /// Repeat the motion found at the clip edge.
    Extrapolate,
}

/// Authored annotations over a time range of a clip.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum MotionTag {
    /// Scale (or replace) the favour of every pose in range.
    CostMultiplier {
        start: f32,
        end: f32,
        multiplier: f32,
        #[serde(default = "default_true")]
        replace: bool,
    },
    /// Exclude poses from being searched.
    DoNotUse { start: f32, end: f32 },
    /// Only allow poses to be reached by continuing from the previous pose.
    NextNatural { start: f32, end: f32 },
    /// Add motion traits to poses in range.
    Traits {
        start: f32,
        end: f32,
        traits: MotionTraits,
    },
    /// A named point of interest used by distance matching.
    DistanceMarker {
        name: String,
        time: f32,
        /// Time before the marker that is still considered.
        lead: f32,
        /// Time after the marker that is still considered.
        tail: f32,
    },
}

fn default_true() -> bool {
    true
}

fn default_one() -> f32 {
    1.0
}

/// Source animation description used by preprocessing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MotionClip {
    pub name: String,
    #[serde(default)]
    pub anim_kind: AnimKind,
    /// Play length in seconds.
    pub length: f32,
    #[serde(default = "default_one")]
    pub play_rate: f32,
    #[serde(default)]
    pub looping: bool,
    #[serde(default)]
    pub enable_mirroring: bool,
    #[serde(default)]
    pub traits: MotionTraits,
    /// Cost multiplier applied to every pose of the clip.
    #[serde(default = "default_one")]
    pub favour: f32,
    #[serde(default)]
    pub past_trajectory: TrajectoryPreprocessMethod,
    #[serde(default)]
    pub future_trajectory: TrajectoryPreprocessMethod,
    /// Blend space sample positions, each producing its own run of poses.
    #[serde(default)]
    pub blend_space_positions: Vec<Vec2>,
    #[serde(default)]
    pub tags: Vec<MotionTag>,
}

impl MotionClip {
    pub fn new(name: impl Into<String>, length: f32) -> Self {
        Self {
            name: name.into(),
            anim_kind: AnimKind::Sequence,
            length,
            play_rate: 1.0,
            looping: false,
            enable_mirroring: false,
            traits: MotionTraits::NONE,
            favour: 1.0,
            past_trajectory: TrajectoryPreprocessMethod::IgnoreEdges,
            future_trajectory: TrajectoryPreprocessMethod::IgnoreEdges,
            blend_space_positions: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_mirroring(mut self, enable: bool) -> Self {
        self.enable_mirroring = enable;
        self
    }

    pub fn with_traits(mut self, traits: MotionTraits) -> Self {
        self.traits = traits;
        self
    }

    pub fn with_trajectory_methods(
        mut self,
        past: TrajectoryPreprocessMethod,
        future: TrajectoryPreprocessMethod,
    ) -> Self {
        self.past_trajectory = past;
        self.future_trajectory = future;
        self
    }

    pub fn with_tag(mut self, tag: MotionTag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Blend space positions to sample, a single origin sample for other kinds.
    pub fn sample_positions(&self) -> Vec<Vec2> {
        match (self.anim_kind, self.blend_space_positions.is_empty()) {
            (AnimKind::BlendSpace, false) => self.blend_space_positions.clone(),
            _ => vec![Vec2::ZERO],
        }
    }

    /// Number of poses sampled per mirror and blend space run.
    ///
    /// ```
    /// use bevy_motion_matching_core::motion_data::motion_clip::MotionClip;
    ///
    /// let clip = MotionClip::new("walk", 1.0);
    /// assert_eq!(clip.pose_count(0.1), 11);
    /// ```
    pub fn pose_count(&self, pose_interval: f32) -> usize {
        let step = pose_interval * self.play_rate;
        if step <= 0.0 || self.length < 0.0 {
            return 0;
        }

        // Tolerate float drift so that 1.0 / 0.1 still counts 10 whole steps.
        (self.length / step + 1e-4).floor() as usize + 1
    }

    pub fn clip_ref(&self, anim_id: usize, blend_space_position: Vec2) -> ClipRef {
        ClipRef {
            anim_id,
            anim_kind: self.anim_kind,
            blend_space_position,
        }
    }

    /// Distance markers named `name`, as `(time, lead, tail)`.
    pub fn distance_markers<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = (f32, f32, f32)> + 'a {
        self.tags.iter().filter_map(move |tag| match tag {
            MotionTag::DistanceMarker {
                name: marker,
                time,
                lead,
                tail,
            } if marker == name => Some((*time, *lead, *tail)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_count_respects_play_rate() {
        let clip = MotionClip {
            play_rate: 2.0,
            ..MotionClip::new("run", 1.0)
        };
        // Steps of 0.2 seconds in clip time.
        assert_eq!(clip.pose_count(0.1), 6);
    }

    #[test]
    fn tags_deserialize_from_json() {
        let json = r#"[
            { "type": "DoNotUse", "start": 0.0, "end": 0.2 },
            { "type": "CostMultiplier", "start": 0.2, "end": 0.4, "multiplier": 0.5 }
        ]"#;

        let tags: Vec<MotionTag> = serde_json::from_str(json).unwrap();
        assert_eq!(
            tags[1],
            MotionTag::CostMultiplier {
                start: 0.2,
                end: 0.4,
                multiplier: 0.5,
                replace: true,
            }
        );
    }
}
