use serde::{Deserialize, Serialize};

use super::{FeatureCategory, FeatureEvaluator, PreprocessSample};

/// Which side of a distance marker is measured.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMatchType {
    /// Approaching the marker, positive values.
    #[default]
    Forward,
    /// Leaving the marker, negative values.
    Backward,
    Both,
}

/// Signed squared root distance to the nearest matching distance marker.
///
/// Poses outside of every marker's lead/tail window evaluate to `0`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DistanceToMarker {
    pub marker: String,
    #[serde(default)]
    pub match_type: DistanceMatchType,
}

impl DistanceToMarker {
    pub fn new(marker: impl Into<String>, match_type: DistanceMatchType) -> Self {
        Self {
            marker: marker.into(),
            match_type,
        }
    }

    fn measures_forward(&self) -> bool {
        matches!(self.match_type, DistanceMatchType::Forward | DistanceMatchType::Both)
    }

    fn measures_backward(&self) -> bool {
        matches!(self.match_type, DistanceMatchType::Backward | DistanceMatchType::Both)
    }

    fn squared_distance(&self, sample: &PreprocessSample<'_>, start: f32, delta: f32) -> Option<f32> {
        sample
            .sampler
            .root_motion(&sample.clip_ref, start, delta, false)
            .map(|delta| delta.translation.length_squared())
    }
}

impl FeatureEvaluator for DistanceToMarker {
    fn size(&self) -> usize {
        1
    }

    fn default_category(&self) -> FeatureCategory {
        FeatureCategory::Responsiveness
    }

    fn validate(&self) -> Result<(), String> {
        match self.marker.is_empty() {
            true => Err("distance marker name is empty".into()),
            false => Ok(()),
        }
    }

    fn evaluate_preprocess(&self, out: &mut [f32], sample: &PreprocessSample<'_>) {
        let time = sample.time;

        for (marker_time, lead, tail) in sample.clip.distance_markers(&self.marker) {
            if self.measures_forward() && time > marker_time - lead && time < marker_time {
                if let Some(distance) = self.squared_distance(sample, time, marker_time - time) {
                    out[0] = distance;
                }
                return;
            }

            if self.measures_backward() && time > marker_time && time < marker_time + tail {
                if let Some(distance) =
                    self.squared_distance(sample, marker_time, time - marker_time)
                {
                    out[0] = -distance;
                }
                return;
            }
        }
    }
}
