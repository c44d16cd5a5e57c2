use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::{FeatureEvaluator, PreprocessSample};
use crate::sampler::{MotionSnapshot, RootDelta};

/// Root motion over one pose interval centered on the pose time.
fn root_motion_around(sample: &PreprocessSample<'_>) -> Option<RootDelta> {
    let interval = sample.pose_interval;
    sample.sampler.root_motion(
        &sample.clip_ref,
        sample.time - interval * 0.5,
        interval,
        sample.clip.looping,
    )
}

/// Root velocity on the ground plane.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct BodyMomentum2D {}

impl FeatureEvaluator for BodyMomentum2D {
    fn size(&self) -> usize {
        2
    }

    fn evaluate_preprocess(&self, out: &mut [f32], sample: &PreprocessSample<'_>) {
        let Some(delta) = root_motion_around(sample) else {
            return;
        };

        let velocity = delta.translation * sample.clip.play_rate / sample.pose_interval;
        out[0] = sample.mirror_x(velocity.x);
        out[1] = velocity.z;
    }

    fn is_snapshot_compatible(&self) -> bool {
        true
    }

    fn extract_runtime(&self, out: &mut [f32], snapshot: &dyn MotionSnapshot) -> bool {
        let Some((velocity, _)) = snapshot.root_velocity() else {
            return false;
        };
        out.copy_from_slice(&velocity.xz().to_array());
        true
    }
}

/// Root yaw rate in radians per second.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct BodyMomentumRot {}

impl FeatureEvaluator for BodyMomentumRot {
    fn size(&self) -> usize {
        1
    }

    fn evaluate_preprocess(&self, out: &mut [f32], sample: &PreprocessSample<'_>) {
        if let Some(delta) = root_motion_around(sample) {
            let yaw_rate = delta.yaw * sample.clip.play_rate / sample.pose_interval;
            out[0] = sample.mirror_x(yaw_rate);
        }
    }

    fn is_snapshot_compatible(&self) -> bool {
        true
    }

    fn extract_runtime(&self, out: &mut [f32], snapshot: &dyn MotionSnapshot) -> bool {
        let Some((_, yaw_rate)) = snapshot.root_velocity() else {
            return false;
        };
        out[0] = yaw_rate;
        true
    }
}
