use bevy::prelude::*;
use motion_database::MotionDatabase;

pub mod chunk;
pub mod motion_clip;
pub mod motion_database;
pub mod pose;
pub mod pose_matrix;
pub mod search_matrix;
pub mod trait_map;

pub struct MotionDataPlugin;

impl Plugin for MotionDataPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(motion_database::MotionDatabasePlugin);
    }
}

/// Database used by characters that do not name their own.
#[derive(Resource, Debug, Deref, DerefMut)]
pub struct MotionDatabaseHandle(pub Handle<MotionDatabase>);

#[derive(bevy::ecs::system::SystemParam)]
pub struct MotionData<'w> {
    pub assets: Res<'w, Assets<MotionDatabase>>,
    pub handle: Res<'w, MotionDatabaseHandle>,
}

impl MotionData<'_> {
    pub fn get(&self) -> Option<&MotionDatabase> {
        self.assets.get(&**self.handle)
    }
}
