use std::ops::{BitOr, BitOrAssign};

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Search eligibility of a pose.
///
/// Variants are ordered, anything past [`PoseSearchFlag::NextNatural`] must never be
/// returned by a search.
#[derive(
    Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum PoseSearchFlag {
    #[default]
    Searchable,
    /// Only reachable by continuing naturally from the previous pose.
    NextNatural,
    /// Close to a [`PoseSearchFlag::DoNotUse`] region.
    EdgePose,
    DoNotUse,
}

impl PoseSearchFlag {
    #[inline]
    pub fn is_usable(self) -> bool {
        self <= Self::NextNatural
    }
}

/// Kind of the source animation a pose was sampled from.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimKind {
    #[default]
    Sequence,
    BlendSpace,
    Composite,
}

/// Bit field of categorical tags partitioning the pose database (stance, weapon state...).
///
/// ```
/// use bevy_motion_matching_core::motion_data::pose::MotionTraits;
///
/// let crouch = MotionTraits::from_bit(0);
/// let armed = MotionTraits::from_bit(3);
/// let both = crouch | armed;
///
/// assert!(both.contains(armed));
/// assert!(!crouch.contains(both));
/// ```
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deref,
    DerefMut,
)]
pub struct MotionTraits(pub u64);

impl MotionTraits {
    pub const NONE: Self = Self(0);

    /// Trait with a single bit set. Bits past 63 are ignored.
    pub fn from_bit(bit: u8) -> Self {
        Self(1u64.checked_shl(u32::from(bit)).unwrap_or_default())
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for MotionTraits {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MotionTraits {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One sampled instant of a source animation.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq)]
pub struct PoseMotionData {
    pub pose_id: usize,
    pub anim_id: usize,
    pub anim_kind: AnimKind,
    /// Sample time inside the source clip in seconds.
    pub time: f32,
    pub mirrored: bool,
    pub last_pose_id: usize,
    pub next_pose_id: usize,
    pub search_flag: PoseSearchFlag,
    pub traits: MotionTraits,
    pub blend_space_position: Vec2,
    /// Column of the pose lookup table, if one was built.
    pub candidate_set_id: Option<usize>,
}

impl PoseMotionData {
    /// Interpolate two pose records.
    ///
    /// Discrete fields come from whichever pose is nearer to `factor`, while sequencing
    /// always points from `from` to `to`.
    pub fn lerp(from: &Self, to: &Self, factor: f32) -> Self {
        let nearest = match factor < 0.5 {
            true => from,
            false => to,
        };

        Self {
            pose_id: nearest.pose_id,
            anim_id: nearest.anim_id,
            anim_kind: nearest.anim_kind,
            time: f32::lerp(from.time, to.time, factor),
            mirrored: nearest.mirrored,
            last_pose_id: from.pose_id,
            next_pose_id: to.pose_id,
            search_flag: nearest.search_flag,
            traits: nearest.traits,
            blend_space_position: Vec2::lerp(
                from.blend_space_position,
                to.blend_space_position,
                factor,
            ),
            candidate_set_id: nearest.candidate_set_id,
        }
    }

    /// Whether `other` plays from the same clip run (same animation, kind, mirror state and
    /// blend-space sample).
    pub fn shares_clip_run(&self, other: &Self) -> bool {
        self.anim_id == other.anim_id
            && self.anim_kind == other.anim_kind
            && self.mirrored == other.mirrored
            && self
                .blend_space_position
                .abs_diff_eq(other.blend_space_position, 0.001)
    }
}
