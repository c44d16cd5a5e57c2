use std::collections::HashMap;
use std::sync::Arc;

use bevy::prelude::*;

use config::MotionMatchingSettings;
use motion_data::motion_database::MotionDatabase;
use motion_data::pose::MotionTraits;
use motion_data::{MotionData, MotionDatabaseHandle};
use node::{MotionMatchingContext, MotionMatchingInput, TransitionRequest};
use telemetry::NoDebug;

pub mod blend;
pub mod calibration;
pub mod config;
pub mod error;
pub mod feature;
pub mod motion_data;
pub mod node;
pub mod optimisation;
pub mod sampler;
pub mod search;
pub mod telemetry;

pub mod prelude {
    pub use crate::calibration::MotionCalibration;
    pub use crate::config::{
        MirrorProfile, MotionMatchConfig, MotionMatchingSettings, PastTrajectoryMode,
        PoseMatchMethod, TransitionMethod,
    };
    pub use crate::error::{PreprocessError, SetupError};
    pub use crate::feature::{FeatureCategory, FeatureKind, MatchFeature};
    pub use crate::motion_data::motion_clip::{MotionClip, MotionTag, TrajectoryPreprocessMethod};
    pub use crate::motion_data::motion_database::MotionDatabase;
    pub use crate::motion_data::pose::{AnimKind, MotionTraits, PoseMotionData, PoseSearchFlag};
    pub use crate::motion_data::MotionDatabaseHandle;
    pub use crate::node::{MotionMatchingContext, MotionMatchingInput, TransitionRequest};
    pub use crate::optimisation::MultiClusteringSettings;
    pub use crate::sampler::{ClipRef, MotionSnapshot, PoseSampler, RootDelta};
    pub use crate::{MotionMatching, MotionMatchingPlugin, MotionMatchingSet, TransitionRequested};
}

pub struct MotionMatchingPlugin;

impl Plugin for MotionMatchingPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(motion_data::MotionDataPlugin)
            .init_resource::<MotionDatabaseCache>()
            .add_event::<TransitionRequested>()
            .configure_sets(Update, MotionMatchingSet::Update)
            .add_systems(
                Update,
                (
                    cache_motion_databases,
                    assign_default_database.run_if(resource_exists::<MotionDatabaseHandle>),
                    update_motion_matching,
                )
                    .chain()
                    .in_set(MotionMatchingSet::Update),
            );
    }
}

#[derive(SystemSet, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum MotionMatchingSet {
    Update,
}

/// Sent whenever a character jumps and wants the host to inertialize.
#[derive(Event, Debug, Clone, Copy)]
pub struct TransitionRequested {
    pub entity: Entity,
    pub request: TransitionRequest,
}

/// Motion matching driven character.
///
/// Fill [`MotionMatching::desired_input`] every frame before [`MotionMatchingSet::Update`].
#[derive(Component)]
pub struct MotionMatching {
    /// Falls back to [`MotionDatabaseHandle`] when [`None`].
    pub database: Option<Handle<MotionDatabase>>,
    pub settings: MotionMatchingSettings,
    pub desired_input: Vec<f32>,
    pub required_traits: MotionTraits,
    /// Draw trajectories with gizmos.
    pub debug_draw: bool,
    context: Option<MotionMatchingContext>,
}

impl MotionMatching {
    pub fn new(settings: MotionMatchingSettings) -> Self {
        Self {
            database: None,
            settings,
            desired_input: Vec::new(),
            required_traits: MotionTraits::NONE,
            debug_draw: false,
            context: None,
        }
    }

    pub fn with_database(mut self, database: Handle<MotionDatabase>) -> Self {
        self.database = Some(database);
        self
    }

    /// [`None`] until the database is loaded.
    pub fn context(&self) -> Option<&MotionMatchingContext> {
        self.context.as_ref()
    }

    pub fn context_mut(&mut self) -> Option<&mut MotionMatchingContext> {
        self.context.as_mut()
    }
}

/// Loaded databases, shared with every context using them.
#[derive(Resource, Default)]
struct MotionDatabaseCache(HashMap<AssetId<MotionDatabase>, Arc<MotionDatabase>>);

fn cache_motion_databases(
    mut asset_evr: EventReader<AssetEvent<MotionDatabase>>,
    assets: Res<Assets<MotionDatabase>>,
    mut cache: ResMut<MotionDatabaseCache>,
) {
    for event in asset_evr.read() {
        match event {
            AssetEvent::Added { id } | AssetEvent::Modified { id } => {
                if let Some(database) = assets.get(*id) {
                    info!("Motion database {id} ready with {} poses.", database.pose_count());
                    cache.0.insert(*id, Arc::new(database.clone()));
                }
            }
            AssetEvent::Removed { id } | AssetEvent::Unused { id } => {
                cache.0.remove(id);
            }
            AssetEvent::LoadedWithDependencies { .. } => {}
        }
    }
}

fn assign_default_database(motion_data: MotionData, mut q_motion_matching: Query<&mut MotionMatching>) {
    for mut motion_matching in q_motion_matching.iter_mut() {
        if motion_matching.database.is_none() {
            motion_matching.database = Some(motion_data.handle.clone_weak());
        }
    }

    if motion_data.get().is_none() {
        debug!("Default motion database is not loaded yet.");
    }
}

fn update_motion_matching(
    mut q_motion_matching: Query<(Entity, &mut MotionMatching, Option<&GlobalTransform>)>,
    cache: Res<MotionDatabaseCache>,
    time: Res<Time>,
    mut gizmos: Gizmos,
    mut transition_evw: EventWriter<TransitionRequested>,
) {
    let delta_time = time.delta_seconds();

    for (entity, mut motion_matching, global_transform) in q_motion_matching.iter_mut() {
        let Some(database) = motion_matching
            .database
            .as_ref()
            .and_then(|handle| cache.0.get(&handle.id()))
        else {
            continue;
        };

        // Rebuild when the database was reloaded.
        let stale = motion_matching
            .context
            .as_ref()
            .map_or(true, |context| !Arc::ptr_eq(context.database(), database));
        if stale {
            let context =
                MotionMatchingContext::new_or_invalid(Arc::clone(database), motion_matching.settings.clone());
            motion_matching.context = Some(context);
        }

        let motion_matching = motion_matching.as_mut();
        let Some(context) = motion_matching.context.as_mut() else {
            continue;
        };

        let input = MotionMatchingInput::new(&motion_matching.desired_input)
            .with_traits(motion_matching.required_traits);
        let mut requests = Vec::new();

        if motion_matching.debug_draw {
            context.update(delta_time, &input, &mut requests, &mut gizmos);
            let transform = global_transform.map_or(Transform::IDENTITY, |transform| transform.compute_transform());
            context.draw_debug(&mut gizmos, &transform);
        } else {
            context.update(delta_time, &input, &mut requests, &mut NoDebug);
        }

        for request in requests {
            transition_evw.send(TransitionRequested { entity, request });
        }
    }
}
