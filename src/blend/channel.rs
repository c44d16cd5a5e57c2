use std::f32::consts::FRAC_PI_2;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::motion_data::motion_clip::MotionClip;
use crate::motion_data::pose::{AnimKind, PoseMotionData};

/// Channels created at full weight start this far into their blend.
pub const PRE_AGE: f32 = 0.3;

/// Weight above which a new channel counts as fully blended in.
const FULL_WEIGHT: f32 = 0.999;

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum BlendStatus {
    #[default]
    Inactive,
    Decay,
    Chosen,
    Dominant,
}

/// Playback state of one animation contributing to the blended output.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct BlendChannel {
    pub anim_id: usize,
    pub anim_kind: AnimKind,
    pub start_pose_id: usize,
    /// Clip time the channel started at, moved back by [`PRE_AGE`] when pre-aged.
    pub start_time: f32,
    pub anim_time: f32,
    pub age: f32,
    pub decay_age: f32,
    pub weight: f32,
    pub highest_weight: f32,
    pub looping: bool,
    pub clip_length: f32,
    /// Clip seconds played per second of node time.
    pub play_rate: f32,
    pub mirrored: bool,
    pub blend_space_position: Vec2,
    pub status: BlendStatus,
    /// Age given at construction, not actually played.
    pub pre_age: f32,
}

impl BlendChannel {
    pub fn new(
        pose: &PoseMotionData,
        status: BlendStatus,
        weight: f32,
        clip: &MotionClip,
        time_offset: f32,
    ) -> Self {
        let mut channel = Self {
            anim_id: pose.anim_id,
            anim_kind: pose.anim_kind,
            start_pose_id: pose.pose_id,
            start_time: pose.time,
            anim_time: pose.time + time_offset,
            age: time_offset,
            decay_age: 0.0,
            weight,
            highest_weight: weight,
            looping: clip.looping,
            clip_length: clip.length,
            play_rate: clip.play_rate,
            mirrored: pose.mirrored,
            blend_space_position: pose.blend_space_position,
            status,
            pre_age: 0.0,
        };

        if weight > FULL_WEIGHT {
            channel.start_time -= PRE_AGE;
            channel.age = PRE_AGE + time_offset;
            channel.pre_age = PRE_AGE;
        }

        channel.anim_time = channel.anim_time.min(clip.length);
        channel
    }

    /// Advance the channel by `delta_time`.
    ///
    /// The current channel blends in, every other channel decays. Returns the new
    /// weight, or `-1` once a decaying channel has faded out and gone inactive.
    pub fn update(&mut self, delta_time: f32, blend_time: f32, is_current: bool) -> f32 {
        if self.status == BlendStatus::Inactive {
            return 0.0;
        }

        self.anim_time += delta_time * self.play_rate;
        if self.looping && self.clip_length > 0.0 && self.anim_time > self.clip_length {
            self.anim_time -= self.clip_length;
        }

        if is_current {
            self.age += delta_time;
            self.weight = blend_curve(self.age, blend_time);
            self.highest_weight = self.weight;
        } else {
            self.weight = self.highest_weight * (1.0 - blend_curve(self.decay_age, blend_time));

            if self.weight < delta_time {
                self.weight = 0.0;
                self.highest_weight = 0.0;
                self.age = 0.0;
                self.decay_age = 0.0;
                self.status = BlendStatus::Inactive;
                return -1.0;
            }

            self.age += delta_time;
            self.decay_age += delta_time;
        }

        self.weight
    }

    /// Time played since the start pose.
    pub fn played_time(&self) -> f32 {
        self.age - self.pre_age
    }

    /// Clip time of the start pose.
    pub fn start_pose_time(&self) -> f32 {
        self.start_time + self.pre_age
    }
}

/// `sin(π/2 · clamp(age / blend_time))`.
fn blend_curve(age: f32, blend_time: f32) -> f32 {
    let progress = match blend_time > 0.0 {
        true => (age / blend_time).clamp(0.0, 1.0),
        false => 1.0,
    };
    (FRAC_PI_2 * progress).sin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(length: f32, looping: bool) -> MotionClip {
        MotionClip::new("walk", length).looping(looping)
    }

    fn pose() -> PoseMotionData {
        PoseMotionData {
            pose_id: 4,
            anim_id: 1,
            time: 0.4,
            ..default()
        }
    }

    #[test]
    fn full_weight_channels_are_pre_aged() {
        let channel = BlendChannel::new(&pose(), BlendStatus::Dominant, 1.0, &clip(2.0, false), 0.0);

        assert!((channel.start_time - 0.1).abs() < 1e-6);
        assert_eq!(channel.age, PRE_AGE);
        assert_eq!(channel.anim_time, 0.4);
        assert_eq!(channel.played_time(), 0.0);
        assert!((channel.start_pose_time() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn anim_time_is_clamped_to_the_clip() {
        let channel = BlendChannel::new(&pose(), BlendStatus::Chosen, 0.0, &clip(0.5, false), 0.3);
        assert_eq!(channel.anim_time, 0.5);
    }

    #[test]
    fn looping_channels_wrap() {
        let mut channel = BlendChannel::new(&pose(), BlendStatus::Chosen, 0.0, &clip(0.5, true), 0.0);
        channel.update(0.2, 0.3, true);
        assert!((channel.anim_time - 0.1).abs() < 1e-5);
    }

    #[test]
    fn inactive_channels_do_nothing() {
        let mut channel = BlendChannel::default();
        assert_eq!(channel.update(0.1, 0.3, true), 0.0);
        assert_eq!(channel.anim_time, 0.0);
    }

    #[test]
    fn decaying_channel_goes_inactive() {
        let mut channel = BlendChannel::new(&pose(), BlendStatus::Dominant, 1.0, &clip(10.0, false), 0.0);

        let mut last = 1.0;
        let mut ticks = 0;
        while last >= 0.0 {
            last = channel.update(0.05, 0.3, false);
            ticks += 1;
            assert!(ticks < 100);
        }

        assert_eq!(last, -1.0);
        assert_eq!(channel.status, BlendStatus::Inactive);
        assert_eq!(channel.weight, 0.0);
    }
}
