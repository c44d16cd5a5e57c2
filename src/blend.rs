//! Blend channel state machine of a motion matching node.

use serde::{Deserialize, Serialize};

use crate::motion_data::motion_clip::MotionClip;
use crate::motion_data::pose::PoseMotionData;

pub mod channel;

pub use channel::{BlendChannel, BlendStatus};

/// Non current channels whose update returned less than this are removed.
pub const PRUNE_WEIGHT: f32 = -0.05;

/// Every channel currently contributing to the output.
///
/// The last channel is the most recently chosen one.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct BlendChannels {
    channels: Vec<BlendChannel>,
    dominant: usize,
}

impl BlendChannels {
    /// Replace every channel with `pose` at full weight.
    pub fn jump_to_pose(
        &mut self,
        pose: &PoseMotionData,
        clip: &MotionClip,
        time_offset: f32,
    ) {
        self.channels.clear();
        self.channels.push(BlendChannel::new(
            pose,
            BlendStatus::Dominant,
            1.0,
            clip,
            time_offset,
        ));
        self.dominant = 0;
    }

    /// Start blending towards `pose`, every other channel decays.
    pub fn blend_to_pose(
        &mut self,
        pose: &PoseMotionData,
        clip: &MotionClip,
        time_offset: f32,
    ) {
        for channel in self.channels.iter_mut() {
            if channel.status != BlendStatus::Inactive {
                channel.status = BlendStatus::Decay;
            }
        }

        self.channels.push(BlendChannel::new(
            pose,
            BlendStatus::Chosen,
            0.0,
            clip,
            time_offset,
        ));
    }

    /// Advance every channel, drop faded ones and elect the dominant channel.
    ///
    /// `delta_time` is already scaled by the playback rate.
    pub fn update_blending(&mut self, delta_time: f32, blend_time: f32) {
        let mut highest_weight = f32::MIN;
        let mut dominant = 0;

        let mut index = 0;
        while index < self.channels.len() {
            let is_current = index + 1 == self.channels.len();
            let weight = self.channels[index].update(delta_time, blend_time, is_current);

            if !is_current && weight < PRUNE_WEIGHT {
                self.channels.remove(index);
                continue;
            }

            if weight > highest_weight {
                highest_weight = weight;
                dominant = index;
            }
            index += 1;
        }

        self.dominant = dominant;
        let len = self.channels.len();
        if let Some(channel) = self.channels.last_mut() {
            if dominant + 1 == len {
                channel.status = BlendStatus::Dominant;
            }
        }
    }

    /// The most recently chosen channel.
    pub fn chosen(&self) -> Option<&BlendChannel> {
        self.channels.last()
    }

    /// The channel with the highest weight.
    pub fn dominant(&self) -> Option<&BlendChannel> {
        self.channels.get(self.dominant)
    }

    pub fn dominant_index(&self) -> usize {
        self.dominant
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlendChannel> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
