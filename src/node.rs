//! Per character motion matching state, ticked once per frame.

use std::sync::Arc;

use bevy::prelude::*;

use crate::blend::BlendChannels;
use crate::calibration::CalibrationData;
use crate::config::{MotionMatchingSettings, PastTrajectoryMode, PoseMatchMethod, TransitionMethod};
use crate::error::SetupError;
use crate::feature::trajectory::TRAJECTORY_POINT_ATOMS;
use crate::feature::FeatureCategory;
use crate::motion_data::motion_database::MotionDatabase;
use crate::motion_data::pose::{MotionTraits, PoseMotionData};
use crate::motion_data::trait_map::TraitMap;
use crate::sampler::MotionSnapshot;
use crate::search::{self, PoseSearch, SearchResult};
use crate::telemetry::MotionMatchingDebug;

pub mod transition;

pub use transition::{TransitionRequest, TransitionSink};

/// Time passed below which the dominant pose is interpolated backwards.
const NEGATIVE_TIME_EPSILON: f32 = -0.00001;

/// Inputs of one tick.
#[derive(Clone, Copy)]
pub struct MotionMatchingInput<'a> {
    /// Desired values of every feature atom, favour excluded.
    ///
    /// Only the atoms of responsiveness features are used.
    pub desired_input: &'a [f32],
    pub required_traits: MotionTraits,
    /// Live skeleton capture overriding snapshot compatible features.
    pub snapshot: Option<&'a dyn MotionSnapshot>,
}

impl<'a> MotionMatchingInput<'a> {
    pub fn new(desired_input: &'a [f32]) -> Self {
        Self {
            desired_input,
            required_traits: MotionTraits::NONE,
            snapshot: None,
        }
    }

    pub fn with_traits(mut self, required_traits: MotionTraits) -> Self {
        self.required_traits = required_traits;
        self
    }

    pub fn with_snapshot(mut self, snapshot: &'a dyn MotionSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// Everything one character needs to motion match against a shared [`MotionDatabase`].
pub struct MotionMatchingContext {
    database: Arc<MotionDatabase>,
    settings: MotionMatchingSettings,
    /// Match method after falling back from unavailable optimisations.
    pose_match_method: PoseMatchMethod,
    /// Search weights per trait, with the runtime ratio override applied.
    calibrations: TraitMap<CalibrationData>,
    blend: BlendChannels,
    required_traits: MotionTraits,
    /// Desired input, favour excluded.
    desired_input: Vec<f32>,
    current_pose: PoseMotionData,
    /// Interpolated database row of the current pose.
    interpolated_pose_array: Vec<f32>,
    /// [`Self::interpolated_pose_array`] with the desired input spliced in, searched against.
    current_pose_array: Vec<f32>,
    chosen_pose_id: usize,
    time_since_motion_chosen: f32,
    time_since_motion_update: f32,
    force_search: bool,
    trigger_transition: bool,
    valid_to_evaluate: bool,
}

impl MotionMatchingContext {
    pub fn new(
        database: Arc<MotionDatabase>,
        settings: MotionMatchingSettings,
    ) -> Result<Self, SetupError> {
        if database.pose_count() == 0 || database.search_matrix().is_empty() {
            return Err(SetupError::EmptyDatabase);
        }
        database.calibration().validate(database.config())?;
        let calibrations = Self::generate_calibration_array(&database, &settings)?;

        let mut pose_match_method = settings.pose_match_method;
        if pose_match_method == PoseMatchMethod::Optimized && database.optimisation().is_none() {
            warn!("Motion matching was set to run optimized but the database has no optimisation, falling back to linear search.");
            pose_match_method = PoseMatchMethod::Linear;
        }

        let atom_count = database.layout().atom_count();
        let mut context = Self {
            settings,
            pose_match_method,
            calibrations,
            blend: BlendChannels::default(),
            required_traits: MotionTraits::NONE,
            desired_input: vec![0.0; atom_count - 1],
            current_pose: PoseMotionData::default(),
            interpolated_pose_array: vec![0.0; atom_count],
            current_pose_array: vec![0.0; atom_count],
            chosen_pose_id: 0,
            time_since_motion_chosen: 0.0,
            time_since_motion_update: 0.0,
            force_search: false,
            trigger_transition: false,
            valid_to_evaluate: true,
            database,
        };

        let start_pose = context
            .database
            .poses()
            .iter()
            .find(|pose| pose.search_flag.is_usable())
            .map_or(0, |pose| pose.pose_id);
        context.jump_to_pose(start_pose, 0.0);
        context.compute_current_pose(None);

        Ok(context)
    }

    /// [`Self::new`], logging the failure and returning a context that never evaluates.
    pub fn new_or_invalid(database: Arc<MotionDatabase>, settings: MotionMatchingSettings) -> Self {
        match Self::new(Arc::clone(&database), settings.clone()) {
            Ok(context) => context,
            Err(err) => {
                error!("Motion matching node failed to initialize: {err}");
                Self {
                    pose_match_method: settings.pose_match_method,
                    settings,
                    calibrations: TraitMap::new(),
                    blend: BlendChannels::default(),
                    required_traits: MotionTraits::NONE,
                    desired_input: Vec::new(),
                    current_pose: PoseMotionData::default(),
                    interpolated_pose_array: Vec::new(),
                    current_pose_array: Vec::new(),
                    chosen_pose_id: 0,
                    time_since_motion_chosen: 0.0,
                    time_since_motion_update: 0.0,
                    force_search: false,
                    trigger_transition: false,
                    valid_to_evaluate: false,
                    database,
                }
            }
        }
    }

    /// Final weights of every used trait, recomputed when the quality vs responsiveness
    /// ratio is overridden.
    pub fn generate_calibration_array(
        database: &MotionDatabase,
        settings: &MotionMatchingSettings,
    ) -> Result<TraitMap<CalibrationData>, SetupError> {
        let Some(ratio) = settings.override_quality_vs_responsiveness else {
            return database
                .used_traits()
                .map(|traits| {
                    database
                        .final_calibration(traits)
                        .cloned()
                        .map(|calibration| (traits, calibration))
                        .ok_or(SetupError::MissingCalibration(traits.0))
                })
                .collect();
        };

        if !(0.0..=1.0).contains(&ratio) {
            return Err(SetupError::InvalidRatio(ratio));
        }

        database
            .used_traits()
            .map(|traits| {
                let std_dev = database
                    .std_dev_calibration(traits)
                    .ok_or(SetupError::MissingCalibration(traits.0))?;
                let weights = CalibrationData::final_weights_with_ratio(
                    database.calibration(),
                    std_dev,
                    database.layout(),
                    ratio,
                )?;
                Ok((traits, weights))
            })
            .collect()
    }

    /// Advance the node by `delta_time` seconds.
    pub fn update(
        &mut self,
        delta_time: f32,
        input: &MotionMatchingInput,
        sink: &mut dyn TransitionSink,
        debug: &mut dyn MotionMatchingDebug,
    ) {
        if !self.valid_to_evaluate {
            return;
        }

        self.set_input(input);

        if self.trigger_transition {
            self.trigger_transition = false;
            self.initialize_matched_transition(input.snapshot, sink);
            return;
        }

        self.update_motion_matching(delta_time, input.snapshot, sink, debug);
        self.blend.update_blending(
            delta_time * self.settings.playback_rate,
            self.settings.blend_time,
        );
        debug.log_metric("blend_channels", self.blend.len() as f32);
    }

    /// Search from scratch and jump on the next update.
    pub fn trigger_transition(&mut self) {
        self.trigger_transition = true;
    }

    fn set_input(&mut self, input: &MotionMatchingInput) {
        self.required_traits = input.required_traits;

        let len = input.desired_input.len().min(self.desired_input.len());
        self.desired_input[..len].copy_from_slice(&input.desired_input[..len]);
        self.desired_input[len..].fill(0.0);
    }

    fn initialize_matched_transition(
        &mut self,
        snapshot: Option<&dyn MotionSnapshot>,
        sink: &mut dyn TransitionSink,
    ) {
        self.time_since_motion_chosen = 0.0;
        self.time_since_motion_update = 0.0;
        self.compute_current_pose(snapshot);

        let database = Arc::clone(&self.database);
        let Some(weights) = self.calibrations.get(self.required_traits) else {
            self.transition_to_pose(0, sink);
            return;
        };

        let lowest = PoseSearch::new(
            &database,
            &self.current_pose_array,
            weights,
            self.required_traits,
        )
        .linear(None);

        let pose_id = lowest.map_or(0, |(_, pose_id)| pose_id);
        self.transition_to_pose(pose_id, sink);
    }

    fn update_motion_matching(
        &mut self,
        delta_time: f32,
        snapshot: Option<&dyn MotionSnapshot>,
        sink: &mut dyn TransitionSink,
        debug: &mut dyn MotionMatchingDebug,
    ) {
        self.force_search = false;
        let delta_time = delta_time * self.settings.playback_rate;
        self.time_since_motion_chosen += delta_time;
        self.time_since_motion_update += delta_time;

        if let Some(chosen) = self.blend.chosen() {
            if !chosen.looping {
                let blend_out = match self.settings.blend_out_early {
                    true => self.settings.blend_time * chosen.weight * self.settings.playback_rate,
                    false => 0.0,
                };

                let end_time = chosen.start_pose_time()
                    + (self.time_since_motion_chosen + blend_out) * chosen.play_rate;
                if end_time > chosen.clip_length {
                    self.force_search = true;
                }
            }
        }

        self.compute_current_pose(snapshot);

        self.force_search |=
            search::must_force_search(&self.database, &self.current_pose, self.settings.blend_time);

        if self.time_since_motion_update >= self.settings.update_interval || self.force_search {
            self.time_since_motion_update = 0.0;
            self.pose_search(sink, debug);
        }
    }

    /// Resolve the chosen pose and interpolate the current pose from the dominant channel.
    pub fn compute_current_pose(&mut self, snapshot: Option<&dyn MotionSnapshot>) {
        let database = Arc::clone(&self.database);
        let interval = database.pose_interval();

        let (Some(chosen), Some(dominant)) = (self.blend.chosen(), self.blend.dominant()) else {
            return;
        };
        let chosen_start = chosen.start_pose_id;
        let dominant_start = dominant.start_pose_id;
        let time_passed = match self.settings.transition_method {
            TransitionMethod::Blend => dominant.played_time(),
            _ => self.time_since_motion_chosen,
        };

        let chosen_steps = poses_passed(self.time_since_motion_chosen, interval);
        self.chosen_pose_id = step_pose(&database, chosen_start, chosen_steps);

        let steps = poses_passed(time_passed, interval);
        let (before, after, factor) = match time_passed < NEGATIVE_TIME_EPSILON {
            true => {
                let after = step_pose(&database, dominant_start, steps);
                let before = database.pose(after).map_or(after, |pose| pose.last_pose_id);
                let factor = 1.0 - (time_passed / interval - steps as f32).abs();
                (before, after, factor)
            }
            false => {
                let before = step_pose(&database, dominant_start, steps);
                let after = database.pose(before).map_or(before, |pose| pose.next_pose_id);
                let factor = time_passed / interval - steps as f32;
                (before, after, factor)
            }
        };

        let (Some(before_pose), Some(after_pose)) = (database.pose(before), database.pose(after))
        else {
            return;
        };
        let factor = factor.clamp(0.0, 1.0);
        self.current_pose = PoseMotionData::lerp(before_pose, after_pose, factor);
        database.lookup_matrix().lerp_rows_into(
            &mut self.interpolated_pose_array,
            before,
            after,
            factor,
        );

        if let Some(snapshot) = snapshot {
            self.apply_snapshot(snapshot);
        }
        if self.settings.past_trajectory_mode == PastTrajectoryMode::CopyFromCurrentPose {
            self.copy_past_from_current_pose();
        }
        self.splice_desired_input();
    }

    fn apply_snapshot(&mut self, snapshot: &dyn MotionSnapshot) {
        let database = Arc::clone(&self.database);
        for (feature, range) in database.features().iter().zip(database.layout().ranges()) {
            let evaluator = feature.evaluator();
            if !evaluator.is_snapshot_compatible() {
                continue;
            }

            if let Some(out) = self.interpolated_pose_array.get_mut(range) {
                evaluator.extract_runtime(out, snapshot);
            }
        }
    }

    fn copy_past_from_current_pose(&mut self) {
        let database = Arc::clone(&self.database);
        let layout = database.layout();
        for (index, feature) in database.features().iter().enumerate() {
            if feature.category() != FeatureCategory::Responsiveness {
                continue;
            }

            let (Some(input), Some(matrix)) = (layout.input_range(index), layout.feature_range(index))
            else {
                continue;
            };
            if let (Some(desired), Some(current)) = (
                self.desired_input.get_mut(input),
                self.interpolated_pose_array.get(matrix),
            ) {
                feature.evaluator().copy_past_from_current(desired, current);
            }
        }
    }

    fn apply_trajectory_blending(&mut self) {
        let database = Arc::clone(&self.database);
        let layout = database.layout();
        for (index, feature) in database.features().iter().enumerate() {
            if feature.category() != FeatureCategory::Responsiveness {
                continue;
            }

            let (Some(input), Some(matrix)) = (layout.input_range(index), layout.feature_range(index))
            else {
                continue;
            };
            if let (Some(desired), Some(current)) = (
                self.desired_input.get_mut(input),
                self.interpolated_pose_array.get(matrix),
            ) {
                feature.evaluator().apply_input_blending(
                    desired,
                    current,
                    self.settings.trajectory_blend_magnitude,
                );
            }
        }
    }

    /// Rebuild the searched array from the interpolated pose and the desired input.
    fn splice_desired_input(&mut self) {
        let layout = self.database.layout();
        self.current_pose_array.clone_from(&self.interpolated_pose_array);

        for (atom, value) in self.current_pose_array.iter_mut().enumerate() {
            match layout.atom_category(atom) {
                None => *value = 1.0,
                Some(FeatureCategory::Responsiveness) => {
                    if let Some(&desired) = self.desired_input.get(atom - 1) {
                        *value = desired;
                    }
                }
                Some(FeatureCategory::Quality) => {}
            }
        }
    }

    fn pose_search(&mut self, sink: &mut dyn TransitionSink, debug: &mut dyn MotionMatchingDebug) {
        let database = Arc::clone(&self.database);

        if self.settings.apply_trajectory_blending {
            self.apply_trajectory_blending();
            self.splice_desired_input();
        }

        self.chosen_pose_id = self.chosen_pose_id.min(database.pose_count().saturating_sub(1));
        let Some(&chosen_pose) = database.pose(self.chosen_pose_id) else {
            return;
        };
        let next_pose = database
            .pose(chosen_pose.next_pose_id)
            .copied()
            .unwrap_or(chosen_pose);

        if !self.force_search
            && self.settings.next_pose_tolerance_test
            && search::next_pose_tolerance_test(
                &database,
                &next_pose,
                self.required_traits,
                &self.desired_input,
                self.settings.position_tolerance,
                self.settings.rotation_tolerance,
            )
        {
            debug.log_metric("search_skipped", 1.0);
            return;
        }

        let Some(lowest) = self.lowest_cost_pose(&database) else {
            debug!(
                "No calibration for traits {:#x}, keeping pose {}.",
                self.required_traits.0, self.chosen_pose_id
            );
            return;
        };
        let Some((cost, pose_id)) = lowest else {
            return;
        };
        debug.log_metric("lowest_cost", cost);

        let Some(best) = database.pose(pose_id) else {
            return;
        };
        if search::is_same_location(best, &self.current_pose)
            || search::is_same_location(best, &chosen_pose)
        {
            return;
        }

        self.transition_to_pose(pose_id, sink);
    }

    /// Lowest cost pose for the current input, [`None`] without a calibration for the
    /// required traits.
    fn lowest_cost_pose(&self, database: &MotionDatabase) -> Option<SearchResult> {
        let weights = self.calibrations.get(self.required_traits)?;
        let search = PoseSearch::new(
            database,
            &self.current_pose_array,
            weights,
            self.required_traits,
        );

        let mut lowest = None;
        if self.settings.favour_current_pose && !self.force_search {
            lowest = search.favour_current_pose(
                self.current_pose.pose_id,
                self.settings.current_pose_favour,
            );
        }

        if self.settings.favour_next_natural {
            lowest = search.next_natural_lowest_cost(
                &self.current_pose,
                self.settings.next_natural_range,
                self.settings.next_natural_favour,
                lowest,
            );
        }

        Some(search.lowest_cost(self.pose_match_method, self.current_pose.pose_id, lowest))
    }

    /// Move playback to `pose_id` using the configured transition method.
    pub fn transition_to_pose(&mut self, pose_id: usize, sink: &mut dyn TransitionSink) {
        match self.settings.transition_method {
            TransitionMethod::None => self.jump_to_pose(pose_id, 0.0),
            TransitionMethod::Blend => self.blend_to_pose(pose_id, 0.0),
            TransitionMethod::Inertialization => {
                self.jump_to_pose(pose_id, 0.0);
                sink.request_transition(TransitionRequest {
                    pose_id,
                    blend_time: self.settings.blend_time,
                });
            }
        }
    }

    /// Play `pose_id` immediately, dropping every other channel.
    pub fn jump_to_pose(&mut self, pose_id: usize, time_offset: f32) {
        let database = Arc::clone(&self.database);
        let Some(pose) = database.pose(pose_id) else {
            warn!("Cannot jump to pose {pose_id}, it is not part of the database.");
            return;
        };
        let Some(clip) = database.clip(pose.anim_id) else {
            error!("Pose {pose_id} refers to missing clip {}.", pose.anim_id);
            return;
        };

        self.time_since_motion_chosen = self.time_since_motion_update;
        self.chosen_pose_id = pose_id;
        self.blend.jump_to_pose(pose, clip, time_offset);
    }

    /// Cross fade towards `pose_id`.
    pub fn blend_to_pose(&mut self, pose_id: usize, time_offset: f32) {
        let database = Arc::clone(&self.database);
        let Some(pose) = database.pose(pose_id) else {
            warn!("Cannot blend to pose {pose_id}, it is not part of the database.");
            return;
        };
        let Some(clip) = database.clip(pose.anim_id) else {
            error!("Pose {pose_id} refers to missing clip {}.", pose.anim_id);
            return;
        };

        self.time_since_motion_chosen = self.time_since_motion_update;
        self.chosen_pose_id = pose_id;
        self.blend.blend_to_pose(pose, clip, time_offset);
    }

    /// Draw the desired and current trajectories around `transform`.
    pub fn draw_debug(&self, debug: &mut dyn MotionMatchingDebug, transform: &Transform) {
        let layout = self.database.layout();
        for (index, feature) in self.database.features().iter().enumerate() {
            if !feature.evaluator().is_trajectory() {
                continue;
            }
            let (Some(input), Some(matrix)) = (layout.input_range(index), layout.feature_range(index))
            else {
                continue;
            };

            let desired = self.desired_input.get(input).unwrap_or_default();
            let current = self.interpolated_pose_array.get(matrix).unwrap_or_default();
            for (points, color) in [
                (desired, Color::srgb(0.2, 0.6, 1.0)),
                (current, Color::srgb(1.0, 0.5, 0.1)),
            ] {
                let mut previous = transform.translation;
                for point in points.chunks_exact(TRAJECTORY_POINT_ATOMS) {
                    let position = transform.transform_point(Vec3::new(point[0], 0.0, point[1]));
                    let facing = transform.rotation * Vec3::new(point[2], 0.0, point[3]);

                    debug.draw_line(previous, position, color);
                    debug.draw_line(position, position + facing * 0.2, color);
                    debug.draw_sphere(position, 0.05, color);
                    previous = position;
                }
            }
        }
    }

    pub fn database(&self) -> &Arc<MotionDatabase> {
        &self.database
    }

    pub fn settings(&self) -> &MotionMatchingSettings {
        &self.settings
    }

    pub fn pose_match_method(&self) -> PoseMatchMethod {
        self.pose_match_method
    }

    pub fn is_valid_to_evaluate(&self) -> bool {
        self.valid_to_evaluate
    }

    pub fn blend_channels(&self) -> &BlendChannels {
        &self.blend
    }

    pub fn current_pose(&self) -> &PoseMotionData {
        &self.current_pose
    }

    /// Searched array: the interpolated pose with the desired input spliced in.
    pub fn current_pose_array(&self) -> &[f32] {
        &self.current_pose_array
    }

    pub fn desired_input(&self) -> &[f32] {
        &self.desired_input
    }

    pub fn chosen_pose_id(&self) -> usize {
        self.chosen_pose_id
    }

    pub fn required_traits(&self) -> MotionTraits {
        self.required_traits
    }

    pub fn calibration(&self, traits: MotionTraits) -> Option<&CalibrationData> {
        self.calibrations.get(traits)
    }

    pub fn time_since_motion_chosen(&self) -> f32 {
        self.time_since_motion_chosen
    }

    /// Whether the last update forced a search.
    pub fn forced_search(&self) -> bool {
        self.force_search
    }
}

/// Whole poses passed, rounded towards the start pose.
fn poses_passed(time_passed: f32, interval: f32) -> i64 {
    let poses = time_passed / interval;
    match time_passed < 0.0 {
        true => poses.ceil() as i64,
        false => poses.floor() as i64,
    }
}

/// Pose `steps` poses away from `pose_id` within its clip run.
///
/// Looping runs wrap, other runs clamp at their ends.
fn step_pose(database: &MotionDatabase, pose_id: usize, steps: i64) -> usize {
    let runs = database.clip_runs();
    let Some((run_start, run_end)) = runs
        .find_chunk(pose_id)
        .and_then(|chunk| runs.get_chunk(chunk))
    else {
        return pose_id.min(database.pose_count().saturating_sub(1));
    };

    let looping = database
        .pose(pose_id)
        .and_then(|pose| database.clip(pose.anim_id))
        .is_some_and(|clip| clip.looping);

    let run_len = (run_end - run_start) as i64;
    let offset = (pose_id - run_start) as i64 + steps;
    let offset = match looping {
        true => offset.rem_euclid(run_len),
        false => offset.clamp(0, run_len - 1),
    };
    run_start + offset as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poses_passed_rounds_towards_the_start() {
        assert_eq!(poses_passed(0.25, 0.1), 2);
        assert_eq!(poses_passed(-0.25, 0.1), -2);
        assert_eq!(poses_passed(0.0, 0.1), 0);
    }

    #[test]
    fn input_builder_sets_traits() {
        let input = [1.0, 2.0];
        let input = MotionMatchingInput::new(&input).with_traits(MotionTraits(3));

        assert_eq!(input.required_traits, MotionTraits(3));
        assert!(input.snapshot.is_none());
    }
}
