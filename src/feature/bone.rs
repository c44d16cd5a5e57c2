use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::{FeatureEvaluator, PreprocessSample};
use crate::sampler::MotionSnapshot;

fn write_vec3(out: &mut [f32], value: Vec3) {
    out.copy_from_slice(&value.to_array());
}

fn validate_bone(bone: &str) -> Result<(), String> {
    match bone.is_empty() {
        true => Err("bone name is empty".into()),
        false => Ok(()),
    }
}

/// Root relative position of a bone.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BoneLocation {
    pub bone: String,
}

impl BoneLocation {
    pub fn new(bone: impl Into<String>) -> Self {
        Self { bone: bone.into() }
    }
}

impl FeatureEvaluator for BoneLocation {
    fn size(&self) -> usize {
        3
    }

    fn validate(&self) -> Result<(), String> {
        validate_bone(&self.bone)
    }

    fn evaluate_preprocess(&self, out: &mut [f32], sample: &PreprocessSample<'_>) {
        let bone = sample.bone(&self.bone);
        let Some(transform) = sample
            .sampler
            .bone_transform(&sample.clip_ref, bone, sample.time)
        else {
            return;
        };

        let mut location = transform.translation;
        location.x = sample.mirror_x(location.x);
        write_vec3(out, location);
    }

    fn is_snapshot_compatible(&self) -> bool {
        true
    }

    fn extract_runtime(&self, out: &mut [f32], snapshot: &dyn MotionSnapshot) -> bool {
        let Some(transform) = snapshot.bone_transform(&self.bone) else {
            return false;
        };
        write_vec3(out, transform.translation);
        true
    }
}

/// Root relative velocity of a bone, by central difference over one pose interval.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BoneVelocity {
    pub bone: String,
}

impl BoneVelocity {
    pub fn new(bone: impl Into<String>) -> Self {
        Self { bone: bone.into() }
    }
}

impl FeatureEvaluator for BoneVelocity {
    fn size(&self) -> usize {
        3
    }

    fn validate(&self) -> Result<(), String> {
        validate_bone(&self.bone)
    }

    fn evaluate_preprocess(&self, out: &mut [f32], sample: &PreprocessSample<'_>) {
        let interval = sample.pose_interval;
        let bone = sample.bone(&self.bone);
        let before_time = (sample.time - interval * 0.5).max(0.0);

        let sampler = sample.sampler;
        let (Some(before), Some(after)) = (
            sampler.bone_transform(&sample.clip_ref, bone, before_time),
            sampler.bone_transform(&sample.clip_ref, bone, before_time + interval),
        ) else {
            return;
        };

        let mut velocity =
            (after.translation - before.translation) * sample.clip.play_rate / interval;
        velocity.x = sample.mirror_x(velocity.x);
        write_vec3(out, velocity);
    }

    fn is_snapshot_compatible(&self) -> bool {
        true
    }

    fn extract_runtime(&self, out: &mut [f32], snapshot: &dyn MotionSnapshot) -> bool {
        let Some(velocity) = snapshot.bone_velocity(&self.bone) else {
            return false;
        };
        write_vec3(out, velocity);
        true
    }
}

fn default_axis() -> Vec3 {
    Vec3::X
}

/// Root relative direction of one of a bone's local axes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BoneFacing {
    pub bone: String,
    #[serde(default = "default_axis")]
    pub axis: Vec3,
}

impl BoneFacing {
    pub fn new(bone: impl Into<String>) -> Self {
        Self {
            bone: bone.into(),
            axis: Vec3::X,
        }
    }

    pub fn with_axis(mut self, axis: Vec3) -> Self {
        self.axis = axis;
        self
    }

    fn facing(&self, transform: &Transform) -> Vec3 {
        (transform.rotation * self.axis).normalize_or_zero()
    }
}

impl FeatureEvaluator for BoneFacing {
    fn size(&self) -> usize {
        3
    }

    fn validate(&self) -> Result<(), String> {
        validate_bone(&self.bone)?;
        match self.axis.length_squared() > 0.0 {
            true => Ok(()),
            false => Err("bone facing axis has zero length".into()),
        }
    }

    fn evaluate_preprocess(&self, out: &mut [f32], sample: &PreprocessSample<'_>) {
        let bone = sample.bone(&self.bone);
        let Some(transform) = sample
            .sampler
            .bone_transform(&sample.clip_ref, bone, sample.time)
        else {
            return;
        };

        let mut facing = self.facing(&transform);
        facing.x = sample.mirror_x(facing.x);
        write_vec3(out, facing);
    }

    fn is_snapshot_compatible(&self) -> bool {
        true
    }

    fn extract_runtime(&self, out: &mut [f32], snapshot: &dyn MotionSnapshot) -> bool {
        let Some(transform) = snapshot.bone_transform(&self.bone) else {
            return false;
        };
        write_vec3(out, self.facing(&transform));
        true
    }

    /// Facing deviates as a whole vector, every atom receives the same distance.
    fn accumulate_distance_to_mean(&self, out: &mut [f32], mean: &[f32], row: &[f32]) {
        let distance = Vec3::from_slice(row).distance_squared(Vec3::from_slice(mean));
        for out in out.iter_mut() {
            *out += distance;
        }
    }
}

/// Root relative height of a bone.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BoneHeight {
    pub bone: String,
}

impl BoneHeight {
    pub fn new(bone: impl Into<String>) -> Self {
        Self { bone: bone.into() }
    }
}

impl FeatureEvaluator for BoneHeight {
    fn size(&self) -> usize {
        1
    }

    fn validate(&self) -> Result<(), String> {
        validate_bone(&self.bone)
    }

    fn evaluate_preprocess(&self, out: &mut [f32], sample: &PreprocessSample<'_>) {
        let bone = sample.bone(&self.bone);
        if let Some(transform) = sample
            .sampler
            .bone_transform(&sample.clip_ref, bone, sample.time)
        {
            out[0] = transform.translation.y;
        }
    }

    fn is_snapshot_compatible(&self) -> bool {
        true
    }

    fn extract_runtime(&self, out: &mut [f32], snapshot: &dyn MotionSnapshot) -> bool {
        let Some(transform) = snapshot.bone_transform(&self.bone) else {
            return false;
        };
        out[0] = transform.translation.y;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facing_distance_is_shared_by_all_atoms() {
        let facing = BoneFacing::new("head");
        let mut out = [0.0; 3];

        facing.accumulate_distance_to_mean(&mut out, &[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert_eq!(out, [2.0; 3]);
    }

    #[test]
    fn empty_bone_is_invalid() {
        assert!(BoneHeight::new("").validate().is_err());
        assert!(BoneLocation::new("hand_r").validate().is_ok());
    }
}
