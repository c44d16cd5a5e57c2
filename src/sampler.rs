//! Capabilities the host engine provides to the motion matching core.
//!
//! Pose sampling and root motion extraction live outside of this crate, features only
//! ever talk to the skeleton through [`PoseSampler`] during preprocessing and through
//! [`MotionSnapshot`] at runtime.

use bevy::prelude::*;

use crate::motion_data::pose::AnimKind;

/// Identifies the source clip a sample is requested from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipRef {
    pub anim_id: usize,
    pub anim_kind: AnimKind,
    /// Only meaningful for [`AnimKind::BlendSpace`].
    pub blend_space_position: Vec2,
}

/// Root motion between two points in time, expressed in the root space of the start time.
///
/// The ground plane is `XZ` and yaw rotates around `Y`, matching Bevy's coordinate system.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RootDelta {
    pub translation: Vec3,
    /// Yaw in radians.
    pub yaw: f32,
}

impl RootDelta {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        yaw: 0.0,
    };

    /// Append `next`, which is expressed in the root space at the end of `self`.
    ///
    /// ```
    /// use bevy::prelude::*;
    /// use bevy_motion_matching_core::sampler::RootDelta;
    ///
    /// let turn = RootDelta { translation: Vec3::Z, yaw: std::f32::consts::FRAC_PI_2 };
    /// let step = RootDelta { translation: Vec3::Z, yaw: 0.0 };
    /// let combined = turn.then(step);
    ///
    /// assert!(combined.translation.abs_diff_eq(Vec3::new(1.0, 0.0, 1.0), 1e-5));
    /// ```
    pub fn then(self, next: Self) -> Self {
        Self {
            translation: self.translation + Quat::from_rotation_y(self.yaw) * next.translation,
            yaw: self.yaw + next.yaw,
        }
    }

    /// Unit facing vector on the ground plane.
    pub fn facing(&self) -> Vec2 {
        Vec2::new(self.yaw.sin(), self.yaw.cos())
    }
}

/// Offline sampling of source animations.
pub trait PoseSampler {
    /// Play length of the source clip, [`None`] if it is missing.
    fn clip_length(&self, clip: &ClipRef) -> Option<f32>;

    /// Whether the clip can be sampled at all.
    ///
    /// Features zero fill their output for clips that cannot.
    fn has_clip(&self, clip: &ClipRef) -> bool {
        self.clip_length(clip).is_some()
    }

    /// Root motion from `start_time` over `delta_time` (which may be negative).
    ///
    /// When `allow_looping` is set, the range wraps around the clip ends.
    fn root_motion(
        &self,
        clip: &ClipRef,
        start_time: f32,
        delta_time: f32,
        allow_looping: bool,
    ) -> Option<RootDelta>;

    /// Root relative transform of a bone.
    fn bone_transform(&self, clip: &ClipRef, bone: &str, time: f32) -> Option<Transform>;
}

/// Live capture of the character skeleton.
pub trait MotionSnapshot {
    /// Root relative transform of a bone.
    fn bone_transform(&self, bone: &str) -> Option<Transform>;

    /// Root relative velocity of a bone.
    fn bone_velocity(&self, bone: &str) -> Option<Vec3>;

    /// Root linear velocity and yaw rate.
    fn root_velocity(&self) -> Option<(Vec3, f32)> {
        None
    }
}
