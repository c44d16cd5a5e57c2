use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::{FeatureCategory, FeatureEvaluator, PreprocessSample};
use crate::motion_data::motion_clip::TrajectoryPreprocessMethod;
use crate::sampler::RootDelta;

/// Atoms per trajectory point: `[position.x, position.z, facing.x, facing.z]`.
pub const TRAJECTORY_POINT_ATOMS: usize = 4;

/// Step used when repeating motion past the clip edges.
const EXTRAPOLATION_STEP: f32 = 0.05;

/// Root position and facing at a set of past (negative) and future (positive) times.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Trajectory2D {
    /// Sample offsets in seconds relative to the pose.
    pub timings: Vec<f32>,
}

impl Trajectory2D {
    pub fn new(timings: Vec<f32>) -> Self {
        Self { timings }
    }

    /// Root delta from the pose time to `point_time` seconds away.
    fn sample_point(&self, sample: &PreprocessSample<'_>, point_time: f32) -> Option<RootDelta> {
        let clip = sample.clip;
        let delta_time = point_time * clip.play_rate;

        if clip.looping {
            return sample
                .sampler
                .root_motion(&sample.clip_ref, sample.time, delta_time, true);
        }

        match delta_time < 0.0 {
            true => self.sample_past(sample, delta_time),
            false => self.sample_future(sample, delta_time),
        }
    }

    fn sample_past(&self, sample: &PreprocessSample<'_>, delta_time: f32) -> Option<RootDelta> {
        let (sampler, clip_ref, time) = (sample.sampler, &sample.clip_ref, sample.time);
        let point_anim_time = time + delta_time;

        if sample.clip.past_trajectory == TrajectoryPreprocessMethod::Extrapolate
            && point_anim_time < 0.0
        {
            let to_start = sampler.root_motion(clip_ref, time, -time, false)?;
            let step = sampler.root_motion(clip_ref, EXTRAPOLATION_STEP, -EXTRAPOLATION_STEP, false)?;
            return Some(extrapolate(to_start, step, -point_anim_time));
        }

        let delta_time = delta_time.clamp(-time, 0.0);
        sampler.root_motion(clip_ref, time, delta_time, false)
    }

    fn sample_future(&self, sample: &PreprocessSample<'_>, delta_time: f32) -> Option<RootDelta> {
        let (sampler, clip_ref, time) = (sample.sampler, &sample.clip_ref, sample.time);
        let length = sample.clip.length;
        let point_anim_time = time + delta_time;

        if sample.clip.future_trajectory == TrajectoryPreprocessMethod::Extrapolate
            && point_anim_time > length
        {
            let to_end = sampler.root_motion(clip_ref, time, length - time, false)?;
            let step = sampler.root_motion(
                clip_ref,
                length - EXTRAPOLATION_STEP,
                EXTRAPOLATION_STEP,
                false,
            )?;
            return Some(extrapolate(to_end, step, point_anim_time - length));
        }

        let delta_time = delta_time.clamp(0.0, (length - time).max(0.0));
        sampler.root_motion(clip_ref, time, delta_time, false)
    }

    fn points<'a>(&'a self, atoms: &'a [f32]) -> impl Iterator<Item = (f32, &'a [f32])> + 'a {
        self.timings
            .iter()
            .copied()
            .zip(atoms.chunks_exact(TRAJECTORY_POINT_ATOMS))
    }
}

/// Chain `step` onto `base` until `overshoot` seconds are covered.
fn extrapolate(base: RootDelta, step: RootDelta, overshoot: f32) -> RootDelta {
    let iterations = (overshoot / EXTRAPOLATION_STEP).round() as usize;
    (0..iterations).fold(base, |delta, _| delta.then(step))
}

impl FeatureEvaluator for Trajectory2D {
    fn size(&self) -> usize {
        self.timings.len() * TRAJECTORY_POINT_ATOMS
    }

    fn default_category(&self) -> FeatureCategory {
        FeatureCategory::Responsiveness
    }

    fn validate(&self) -> Result<(), String> {
        if self.timings.is_empty() {
            return Err("trajectory has no sample timings".into());
        }
        if self.timings.iter().any(|t| !t.is_finite()) {
            return Err("trajectory timings must be finite".into());
        }
        Ok(())
    }

    fn evaluate_preprocess(&self, out: &mut [f32], sample: &PreprocessSample<'_>) {
        for (point, &point_time) in out
            .chunks_exact_mut(TRAJECTORY_POINT_ATOMS)
            .zip(&self.timings)
        {
            let Some(delta) = self.sample_point(sample, point_time) else {
                point.fill(0.0);
                continue;
            };

            let facing = delta.facing();
            point[0] = sample.mirror_x(delta.translation.x);
            point[1] = delta.translation.z;
            point[2] = sample.mirror_x(facing.x);
            point[3] = facing.y;
        }
    }

    fn is_trajectory(&self) -> bool {
        true
    }

    fn apply_input_blending(&self, desired: &mut [f32], current: &[f32], weight: f32) {
        let total_time = self
            .timings
            .last()
            .copied()
            .unwrap_or_default()
            .max(0.00001);

        for ((point, current), &point_time) in desired
            .chunks_exact_mut(TRAJECTORY_POINT_ATOMS)
            .zip(current.chunks_exact(TRAJECTORY_POINT_ATOMS))
            .zip(&self.timings)
        {
            if point_time <= 0.0 {
                continue;
            }

            let progress = ((total_time - point_time) / total_time) * weight;
            for (desired, &current) in point.iter_mut().zip(current) {
                *desired = f32::lerp(current, *desired, progress);
            }
        }
    }

    fn next_pose_tolerance_test(
        &self,
        desired: &[f32],
        row: &[f32],
        position_tolerance: f32,
        rotation_tolerance: f32,
    ) -> bool {
        self.points(desired)
            .zip(self.points(row))
            .filter(|((point_time, _), _)| *point_time > 0.0)
            .all(|((point_time, desired), (_, row))| {
                let position = Vec2::new(desired[0], desired[1]).distance(Vec2::new(row[0], row[1]));
                let facing = Vec2::new(desired[2], desired[3]).distance(Vec2::new(row[2], row[3]));

                position <= point_time * position_tolerance
                    && facing <= point_time * rotation_tolerance
            })
    }

    fn copy_past_from_current(&self, desired: &mut [f32], current: &[f32]) {
        for ((point, current), &point_time) in desired
            .chunks_exact_mut(TRAJECTORY_POINT_ATOMS)
            .zip(current.chunks_exact(TRAJECTORY_POINT_ATOMS))
            .zip(&self.timings)
        {
            if point_time < 0.0 {
                point.copy_from_slice(current);
            }
        }
    }
}
