use bevy::asset::io::Reader;
use bevy::asset::{AssetLoader, AsyncReadExt, LoadContext};
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::chunk::{ChunkIterator, ChunkOffsets};
use super::motion_clip::{MotionClip, MotionTag, TrajectoryPreprocessMethod};
use super::pose::{MotionTraits, PoseMotionData, PoseSearchFlag};
use super::pose_matrix::{PoseMatrix, FAVOUR_ATOM};
use super::search_matrix::{PoseMatrixPose, SearchPoseMatrix};
use super::trait_map::TraitMap;
use crate::calibration::{CalibrationData, MotionCalibration};
use crate::config::MotionMatchConfig;
use crate::error::{MotionDatabaseLoaderError, PreprocessError, SetupError};
use crate::feature::{FeatureLayout, MatchFeature, PreprocessSample};
use crate::optimisation::aabb::PoseAabbTree;
use crate::optimisation::{MultiClustering, MultiClusteringSettings};
use crate::sampler::PoseSampler;
use crate::telemetry::PreprocessProgress;

/// Poses preceding a [`PoseSearchFlag::DoNotUse`] region within this many seconds
/// become [`PoseSearchFlag::EdgePose`].
pub const EDGE_POSE_TIME: f32 = 0.25;

/// Trajectory time (scaled by play rate) that must fit inside a clip for its poses
/// to be searchable when edges are ignored.
const TRAJECTORY_HORIZON: f32 = 1.0;

pub(super) struct MotionDatabasePlugin;

impl Plugin for MotionDatabasePlugin {
    fn build(&self, app: &mut App) {
        app.init_asset::<MotionDatabase>()
            .init_asset_loader::<MotionDatabaseLoader>();
    }
}

/// Preprocessed, immutable pose database shared by every character.
///
/// Poses are stored run by run, a run being one clip sampled at one blend space
/// position and mirror state. Mirrored runs directly follow their unmirrored run.
#[derive(Asset, TypePath, Serialize, Deserialize, Debug, Clone)]
pub struct MotionDatabase {
    config: MotionMatchConfig,
    layout: FeatureLayout,
    calibration: MotionCalibration,
    clips: Vec<MotionClip>,
    /// Pose range of every clip run.
    clip_runs: ChunkOffsets,
    poses: Vec<PoseMotionData>,
    /// Feature rows of every pose, indexed by pose id.
    lookup_matrix: PoseMatrix,
    search_matrix: SearchPoseMatrix,
    std_dev_calibrations: TraitMap<CalibrationData>,
    final_calibrations: TraitMap<CalibrationData>,
    optimisation: Option<MultiClustering>,
    aabb: PoseAabbTree,
}

impl MotionDatabase {
    /// Sample every clip and build the search structures.
    pub fn preprocess(
        config: MotionMatchConfig,
        clips: Vec<MotionClip>,
        calibration: MotionCalibration,
        sampler: &dyn PoseSampler,
        progress: &mut dyn PreprocessProgress,
    ) -> Result<Self, PreprocessError> {
        if config.features.is_empty() {
            return Err(PreprocessError::NoFeatures);
        }
        if clips.is_empty() {
            return Err(PreprocessError::NoClips);
        }
        config.validate()?;
        calibration.validate(&config)?;

        if let Some(clip) = clips
            .iter()
            .find(|clip| !(clip.length.is_finite() && clip.length > 0.0))
        {
            return Err(PreprocessError::InvalidClipLength {
                name: clip.name.clone(),
                length: clip.length,
            });
        }

        let layout = config.layout();
        let mut database = Self {
            layout,
            calibration,
            clips: Vec::new(),
            clip_runs: ChunkOffsets::new(),
            poses: Vec::new(),
            lookup_matrix: PoseMatrix::default(),
            search_matrix: SearchPoseMatrix::default(),
            std_dev_calibrations: TraitMap::new(),
            final_calibrations: TraitMap::new(),
            optimisation: None,
            aabb: PoseAabbTree::default(),
            config,
        };

        let mut rows = Vec::new();
        let clip_count = clips.len();
        for (anim_id, clip) in clips.iter().enumerate() {
            progress.enter_frame(
                &format!("Preprocessing {}", clip.name),
                anim_id as f32 / clip_count as f32,
            );
            info!("Preprocessing {}...", clip.name);
            database.preprocess_clip(anim_id, clip, sampler, &mut rows);
        }
        database.clips = clips;

        database.lookup_matrix =
            PoseMatrix::from_rows(database.layout.atom_count(), rows.iter().map(Vec::as_slice));

        database.generate_pose_sequencing();
        database.mark_edge_poses(EDGE_POSE_TIME);
        database.generate_search_structures()?;

        progress.enter_frame("Preprocessing complete", 1.0);
        info!(
            "Motion database built with {} poses ({} searchable).",
            database.poses.len(),
            database.search_matrix.len()
        );

        Ok(database)
    }

    fn preprocess_clip(
        &mut self,
        anim_id: usize,
        clip: &MotionClip,
        sampler: &dyn PoseSampler,
        rows: &mut Vec<Vec<f32>>,
    ) {
        let interval = self.config.pose_interval();
        let step = interval * clip.play_rate;
        let pose_count = clip.pose_count(interval);
        let horizon = TRAJECTORY_HORIZON * clip.play_rate;

        let mirror_states: &[bool] = match clip.enable_mirroring {
            true => &[false, true],
            false => &[false],
        };

        for blend_space_position in clip.sample_positions() {
            let clip_ref = clip.clip_ref(anim_id, blend_space_position);
            let has_clip = sampler.has_clip(&clip_ref);
            if has_clip == false {
                error!(
                    "Clip '{}' cannot be sampled, its features are zero filled.",
                    clip.name
                );
            }

            for &mirrored in mirror_states {
                let run_start = self.poses.len();

                for index in 0..pose_count {
                    let pose_id = self.poses.len();
                    let time = (index as f32 * step).min(clip.length);

                    let ignored_past = clip.past_trajectory == TrajectoryPreprocessMethod::IgnoreEdges
                        && time < horizon;
                    let ignored_future = clip.future_trajectory
                        == TrajectoryPreprocessMethod::IgnoreEdges
                        && time > clip.length - horizon;
                    let search_flag = match !clip.looping && (ignored_past || ignored_future) {
                        true => PoseSearchFlag::DoNotUse,
                        false => PoseSearchFlag::Searchable,
                    };

                    let mut row = vec![0.0; self.layout.atom_count()];
                    row[FAVOUR_ATOM] = clip.favour;
                    if has_clip {
                        let sample = PreprocessSample {
                            sampler,
                            clip,
                            clip_ref,
                            time,
                            pose_interval: interval,
                            mirrored,
                            mirror_profile: &self.config.mirror_profile,
                        };
                        self.evaluate_features(&mut row, &sample);
                    }
                    rows.push(row);

                    self.poses.push(PoseMotionData {
                        pose_id,
                        anim_id,
                        anim_kind: clip.anim_kind,
                        time,
                        mirrored,
                        last_pose_id: pose_id,
                        next_pose_id: pose_id,
                        search_flag,
                        traits: clip.traits,
                        blend_space_position,
                        candidate_set_id: None,
                    });
                }

                let run = run_start..self.poses.len();
                Self::apply_tags(clip, step, &mut self.poses[run.clone()], &mut rows[run]);
                self.clip_runs.push_chunk(pose_count);
            }
        }
    }

    fn evaluate_features(&self, row: &mut [f32], sample: &PreprocessSample<'_>) {
        for (feature, range) in self.config.features.iter().zip(self.layout.ranges()) {
            feature.evaluator().evaluate_preprocess(&mut row[range], sample);
        }
    }

    /// Apply the section tags of a clip to one of its runs.
    fn apply_tags(
        clip: &MotionClip,
        step: f32,
        poses: &mut [PoseMotionData],
        rows: &mut [Vec<f32>],
    ) {
        let pose_count = poses.len();
        if pose_count == 0 {
            return;
        }

        let pose_index = |time: f32, upper: usize| -> usize {
            let index = (time / step).round_ties_even();
            (index.max(0.0) as usize).min(upper)
        };

        for tag in &clip.tags {
            let (start, end) = match tag {
                MotionTag::CostMultiplier { start, end, .. }
                | MotionTag::DoNotUse { start, end }
                | MotionTag::NextNatural { start, end }
                | MotionTag::Traits { start, end, .. } => (*start, *end),
                MotionTag::DistanceMarker { .. } => continue,
            };

            let start = pose_index(start, pose_count - 1);
            let end = pose_index(end, pose_count);

            for index in start..end {
                let pose = &mut poses[index];
                match tag {
                    MotionTag::CostMultiplier {
                        multiplier,
                        replace,
                        ..
                    } => {
                        if *multiplier < 0.1 {
                            warn!(
                                "Cost multiplier {} on '{}' is below 0.1, is this intended?",
                                multiplier, clip.name
                            );
                        }

                        let favour = &mut rows[index][FAVOUR_ATOM];
                        match replace {
                            true => *favour = multiplier.abs(),
                            false => *favour *= multiplier.abs(),
                        }
                    }
                    MotionTag::DoNotUse { .. } => pose.search_flag = PoseSearchFlag::DoNotUse,
                    MotionTag::NextNatural { .. } => {
                        pose.search_flag = pose.search_flag.max(PoseSearchFlag::NextNatural)
                    }
                    MotionTag::Traits { traits, .. } => pose.traits |= *traits,
                    MotionTag::DistanceMarker { .. } => {}
                }
            }
        }
    }

    /// Link every pose to its neighbours inside its run.
    ///
    /// Run ends wrap on looping clips and point to themselves otherwise.
    pub fn generate_pose_sequencing(&mut self) {
        for (start, end) in self.clip_runs.iter() {
            if start == end {
                continue;
            }

            let looping = self
                .poses
                .get(start)
                .and_then(|pose| self.clips.get(pose.anim_id))
                .is_some_and(|clip| clip.looping);

            for pose_id in start..end {
                let last = match pose_id > start {
                    true => pose_id - 1,
                    false if looping => end - 1,
                    false => pose_id,
                };
                let next = match pose_id + 1 < end {
                    true => pose_id + 1,
                    false if looping => start,
                    false => pose_id,
                };

                let pose = &mut self.poses[pose_id];
                pose.last_pose_id = last;
                pose.next_pose_id = next;
            }
        }
    }

    /// Flag the searchable poses leading into a [`PoseSearchFlag::DoNotUse`] pose.
    pub fn mark_edge_poses(&mut self, edge_time: f32) {
        let edge_pose_count = (edge_time / self.pose_interval()).ceil() as usize;

        let edge_pose_ids: Vec<usize> = self
            .iter_chunk()
            .flat_map(|run| {
                run.iter()
                    .enumerate()
                    .filter(|(_, pose)| pose.search_flag == PoseSearchFlag::DoNotUse)
                    .flat_map(move |(index, _)| run[..index].iter().rev().take(edge_pose_count))
                    .filter(|pose| pose.search_flag == PoseSearchFlag::Searchable)
                    .map(|pose| pose.pose_id)
            })
            .collect();

        for pose_id in edge_pose_ids {
            self.poses[pose_id].search_flag = PoseSearchFlag::EdgePose;
        }
    }

    /// Build the search matrix, calibrations and bounding boxes.
    fn generate_search_structures(&mut self) -> Result<(), SetupError> {
        let mut used_traits: Vec<_> = self.poses.iter().map(|pose| pose.traits).collect();
        used_traits.sort_unstable();
        used_traits.dedup();

        let matrix_poses: Vec<_> = self.poses.iter().map(PoseMatrixPose::from).collect();
        self.search_matrix =
            SearchPoseMatrix::generate(&self.lookup_matrix, &matrix_poses, &used_traits);

        for traits in used_traits {
            let (start, end) = self
                .search_matrix
                .trait_map()
                .section(traits)
                .unwrap_or_default();
            let matrix = self.search_matrix.matrix();
            let rows = (start..end).filter_map(|index| matrix.row(index));

            let std_dev = CalibrationData::standard_deviation_weights(
                rows,
                &self.config.features,
                &self.layout,
            );
            let final_weights =
                CalibrationData::final_weights(&self.calibration, &std_dev, &self.layout)?;

            self.std_dev_calibrations.insert(traits, std_dev);
            self.final_calibrations.insert(traits, final_weights);
        }

        self.aabb = PoseAabbTree::new(&self.search_matrix);
        Ok(())
    }

    /// Cluster every trait partition and build its pose lookup table.
    pub fn build_optimisation(
        &mut self,
        settings: &MultiClusteringSettings,
        progress: &mut dyn PreprocessProgress,
    ) -> Result<(), SetupError> {
        settings.kmeans.validate()?;

        let (optimisation, assignments) = MultiClustering::build(self, settings, progress);
        for pose in self.poses.iter_mut() {
            pose.candidate_set_id = None;
        }
        for (pose_id, set_index) in assignments {
            if let Some(pose) = self.poses.get_mut(pose_id) {
                pose.candidate_set_id = Some(set_index);
            }
        }

        self.optimisation = Some(optimisation);
        Ok(())
    }

    pub fn config(&self) -> &MotionMatchConfig {
        &self.config
    }

    pub fn features(&self) -> &[MatchFeature] {
        &self.config.features
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn calibration(&self) -> &MotionCalibration {
        &self.calibration
    }

    pub fn pose_interval(&self) -> f32 {
        self.config.pose_interval()
    }

    pub fn clips(&self) -> &[MotionClip] {
        &self.clips
    }

    pub fn clip(&self, anim_id: usize) -> Option<&MotionClip> {
        self.clips.get(anim_id)
    }

    pub fn poses(&self) -> &[PoseMotionData] {
        &self.poses
    }

    pub fn pose(&self, pose_id: usize) -> Option<&PoseMotionData> {
        self.poses.get(pose_id)
    }

    pub fn pose_count(&self) -> usize {
        self.poses.len()
    }

    /// Favour of a pose, `1.0` for unknown poses.
    pub fn pose_favour(&self, pose_id: usize) -> f32 {
        self.lookup_matrix.favour(pose_id)
    }

    pub fn lookup_matrix(&self) -> &PoseMatrix {
        &self.lookup_matrix
    }

    pub fn search_matrix(&self) -> &SearchPoseMatrix {
        &self.search_matrix
    }

    pub fn matrix_to_database(&self, matrix_index: usize) -> Option<usize> {
        self.search_matrix.matrix_to_database(matrix_index)
    }

    pub fn database_to_matrix(&self, pose_id: usize) -> Option<usize> {
        self.search_matrix.database_to_matrix(pose_id)
    }

    pub fn std_dev_calibration(&self, traits: MotionTraits) -> Option<&CalibrationData> {
        self.std_dev_calibrations.get(traits)
    }

    pub fn final_calibration(&self, traits: MotionTraits) -> Option<&CalibrationData> {
        self.final_calibrations.get(traits)
    }

    pub fn used_traits(&self) -> impl Iterator<Item = MotionTraits> + '_ {
        self.final_calibrations.keys()
    }

    pub fn optimisation(&self) -> Option<&MultiClustering> {
        self.optimisation.as_ref()
    }

    pub fn aabb(&self) -> &PoseAabbTree {
        &self.aabb
    }

    /// Matrix atoms of every trajectory feature.
    pub fn trajectory_atoms(&self) -> Vec<usize> {
        self.config
            .features
            .iter()
            .zip(self.layout.ranges())
            .filter(|(feature, _)| feature.evaluator().is_trajectory())
            .flat_map(|(_, range)| range)
            .collect()
    }

    /// Pose range of every clip run.
    pub fn clip_runs(&self) -> &ChunkOffsets {
        &self.clip_runs
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl ChunkIterator for MotionDatabase {
    type Item = PoseMotionData;

    fn offsets(&self) -> &ChunkOffsets {
        &self.clip_runs
    }

    fn items(&self) -> &[Self::Item] {
        &self.poses
    }
}

#[derive(Default)]
struct MotionDatabaseLoader;

impl AssetLoader for MotionDatabaseLoader {
    type Asset = MotionDatabase;
    type Settings = ();
    type Error = MotionDatabaseLoaderError;

    async fn load<'a>(
        &'a self,
        reader: &'a mut Reader<'_>,
        _settings: &'a (),
        _load_context: &'a mut LoadContext<'_>,
    ) -> Result<Self::Asset, Self::Error> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await?;

        let database = serde_json::from_slice::<MotionDatabase>(&bytes)?;

        Ok(database)
    }

    fn extensions(&self) -> &[&str] {
        &["mmdb.json"]
    }
}
