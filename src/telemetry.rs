//! Injected sinks for debug drawing and preprocessing progress.
//!
//! Neither sink may influence results, every call site invokes them unconditionally.

use bevy::prelude::*;

/// Debug drawing and metrics of a motion matching node.
pub trait MotionMatchingDebug {
    fn draw_line(&mut self, _start: Vec3, _end: Vec3, _color: Color) {}

    fn draw_sphere(&mut self, _center: Vec3, _radius: f32, _color: Color) {}

    fn log_metric(&mut self, _name: &str, _value: f32) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDebug;

impl MotionMatchingDebug for NoDebug {}

impl MotionMatchingDebug for Gizmos<'_, '_> {
    fn draw_line(&mut self, start: Vec3, end: Vec3, color: Color) {
        self.line(start, end, color);
    }

    fn draw_sphere(&mut self, center: Vec3, radius: f32, color: Color) {
        self.sphere(center, Quat::IDENTITY, radius, color);
    }

    fn log_metric(&mut self, name: &str, value: f32) {
        trace!("{name}: {value}");
    }
}

/// Receives progress of long offline steps.
pub trait PreprocessProgress {
    /// `progress` is within `[0, 1]`.
    fn enter_frame(&mut self, _label: &str, _progress: f32) {}
}

impl PreprocessProgress for () {}

/// Reports progress through [`info!`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl PreprocessProgress for LogProgress {
    fn enter_frame(&mut self, label: &str, progress: f32) {
        info!("{label} ({:.0}%)", progress * 100.0);
    }
}
