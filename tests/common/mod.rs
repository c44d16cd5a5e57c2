#![allow(dead_code)]

use bevy::prelude::*;
use bevy_motion_matching_core::prelude::*;
use bevy_motion_matching_core::feature::{BoneLocation, Trajectory2D};

/// Root motion of a clip moving forward at `speed` while yawing at `yaw_rate`.
#[derive(Debug, Clone, Copy)]
pub struct AnalyticClip {
    pub length: f32,
    pub speed: f32,
    pub yaw_rate: f32,
}

impl AnalyticClip {
    pub fn walk(length: f32) -> Self {
        Self {
            length,
            speed: 1.5,
            yaw_rate: 0.0,
        }
    }

    pub fn turn(length: f32, yaw_rate: f32) -> Self {
        Self {
            length,
            speed: 1.5,
            yaw_rate,
        }
    }

    /// Motion over `delta_time` seconds in the root space of its start.
    fn arc(&self, delta_time: f32) -> RootDelta {
        let yaw = self.yaw_rate * delta_time;
        let translation = match self.yaw_rate.abs() < 1e-6 {
            true => Vec3::new(0.0, 0.0, self.speed * delta_time),
            false => Vec3::new(
                self.speed * (1.0 - yaw.cos()) / self.yaw_rate,
                0.0,
                self.speed * yaw.sin() / self.yaw_rate,
            ),
        };

        RootDelta { translation, yaw }
    }
}

/// Samples clips from closed form root motion.
///
/// The `foot` bone slides forward with clip time so that every pose of a clip is unique.
#[derive(Debug, Default, Clone)]
pub struct AnalyticSampler {
    pub clips: Vec<AnalyticClip>,
}

impl AnalyticSampler {
    pub fn new(clips: Vec<AnalyticClip>) -> Self {
        Self { clips }
    }
}

impl PoseSampler for AnalyticSampler {
    fn clip_length(&self, clip: &ClipRef) -> Option<f32> {
        self.clips.get(clip.anim_id).map(|clip| clip.length)
    }

    fn root_motion(
        &self,
        clip: &ClipRef,
        start_time: f32,
        delta_time: f32,
        allow_looping: bool,
    ) -> Option<RootDelta> {
        let clip = self.clips.get(clip.anim_id)?;
        let delta_time = match allow_looping {
            true => delta_time,
            false => (start_time + delta_time).clamp(0.0, clip.length) - start_time,
        };
        Some(clip.arc(delta_time))
    }

    fn bone_transform(&self, clip: &ClipRef, bone: &str, time: f32) -> Option<Transform> {
        self.clips.get(clip.anim_id)?;
        match bone {
            "foot" => Some(Transform::from_xyz(0.1, 0.1, time * 0.5)),
            "hips" => Some(Transform::from_xyz(0.0, 1.0, 0.0)),
            _ => None,
        }
    }
}

pub fn foot_feature() -> MatchFeature {
    MatchFeature::new(FeatureKind::BoneLocation(BoneLocation::new("foot")))
}

pub fn trajectory_feature() -> MatchFeature {
    MatchFeature::new(FeatureKind::Trajectory2D(Trajectory2D::new(vec![
        -0.2, 0.2, 0.4,
    ])))
}

pub fn build_database(
    config: MotionMatchConfig,
    clips: Vec<MotionClip>,
    sampler: &AnalyticSampler,
) -> MotionDatabase {
    let calibration = MotionCalibration::from_config(&config);
    MotionDatabase::preprocess(config, clips, calibration, sampler, &mut ()).unwrap()
}

/// A straight walk and a left turn, both looping, sampled every 0.1 s.
pub fn locomotion_database() -> MotionDatabase {
    let sampler = AnalyticSampler::new(vec![AnalyticClip::walk(1.0), AnalyticClip::turn(1.0, 1.5)]);
    let config = MotionMatchConfig::new(vec![foot_feature(), trajectory_feature()])
        .with_pose_interval(0.1);

    build_database(
        config,
        vec![
            MotionClip::new("walk", 1.0).looping(true),
            MotionClip::new("turn", 1.0).looping(true),
        ],
        &sampler,
    )
}
