//! Per-atom weights turning raw feature differences into a cost.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::MotionMatchConfig;
use crate::error::SetupError;
use crate::feature::{FeatureCategory, FeatureLayout, MatchFeature};

/// Variance under which an atom is considered constant and ignored.
pub const MIN_VARIANCE: f32 = 1e-5;

/// Multiplier of a category for a quality vs responsiveness ratio.
///
/// A ratio of `0.5` leaves both categories untouched.
///
/// ```
/// use bevy_motion_matching_core::calibration::category_multiplier;
/// use bevy_motion_matching_core::feature::FeatureCategory;
///
/// assert_eq!(category_multiplier(FeatureCategory::Quality, 0.5), 1.0);
/// assert_eq!(category_multiplier(FeatureCategory::Responsiveness, 0.75), 1.5);
/// ```
pub fn category_multiplier(category: FeatureCategory, ratio: f32) -> f32 {
    match category {
        FeatureCategory::Quality => (1.0 - ratio) * 2.0,
        FeatureCategory::Responsiveness => ratio * 2.0,
    }
}

/// Authored weights of every feature atom.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MotionCalibration {
    pub weights: Vec<f32>,
    /// `0` favours quality only, `1` favours responsiveness only.
    pub quality_vs_responsiveness: f32,
}

impl MotionCalibration {
    /// Default weights of every feature at a neutral ratio.
    pub fn from_config(config: &MotionMatchConfig) -> Self {
        Self {
            weights: Self::default_weights(&config.features, false),
            quality_vs_responsiveness: 0.5,
        }
    }

    /// Default weights with every responsiveness atom zeroed.
    pub fn ignoring_input(config: &MotionMatchConfig) -> Self {
        Self {
            weights: Self::default_weights(&config.features, true),
            quality_vs_responsiveness: 0.5,
        }
    }

    pub fn with_ratio(mut self, quality_vs_responsiveness: f32) -> Self {
        self.quality_vs_responsiveness = quality_vs_responsiveness;
        self
    }

    fn default_weights(features: &[MatchFeature], ignore_input: bool) -> Vec<f32> {
        features
            .iter()
            .flat_map(|feature| {
                let ignored =
                    ignore_input && feature.category() == FeatureCategory::Responsiveness;
                (0..feature.size()).map(move |atom| match ignored {
                    true => 0.0,
                    false => feature.default_weight(atom),
                })
            })
            .collect()
    }

    /// Detect a calibration authored against another config.
    pub fn validate(&self, config: &MotionMatchConfig) -> Result<(), SetupError> {
        let expected = config.total_feature_atoms();
        if self.weights.len() != expected {
            return Err(SetupError::CalibrationMismatch {
                expected,
                found: self.weights.len(),
            });
        }

        if !(0.0..=1.0).contains(&self.quality_vs_responsiveness) {
            return Err(SetupError::InvalidRatio(self.quality_vs_responsiveness));
        }

        Ok(())
    }
}

/// One weight per feature atom, the favour atom excluded.
///
/// Atom `a` of a pose row uses weight `a - 1`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Deref)]
pub struct CalibrationData {
    weights: Vec<f32>,
}

impl CalibrationData {
    pub fn from_weights(weights: Vec<f32>) -> Self {
        Self { weights }
    }

    /// Inverse variance of every atom over `rows`.
    ///
    /// Atoms that barely vary receive a weight of `0`.
    pub fn standard_deviation_weights<'a>(
        rows: impl Iterator<Item = &'a [f32]> + Clone,
        features: &[MatchFeature],
        layout: &FeatureLayout,
    ) -> Self {
        let atom_count = layout.feature_atom_count();
        let mut mean = vec![0.0; atom_count];
        let mut pose_count = 0usize;

        for row in rows.clone() {
            for (mean, value) in mean.iter_mut().zip(&row[1..]) {
                *mean += value;
            }
            pose_count += 1;
        }

        if pose_count == 0 {
            return Self::from_weights(vec![0.0; atom_count]);
        }

        for mean in mean.iter_mut() {
            *mean /= pose_count as f32;
        }

        let mut distance_sqr = vec![0.0; atom_count];
        for row in rows {
            for (feature_index, feature) in features.iter().enumerate() {
                let (Some(input), Some(matrix)) = (
                    layout.input_range(feature_index),
                    layout.feature_range(feature_index),
                ) else {
                    continue;
                };

                feature.evaluator().accumulate_distance_to_mean(
                    &mut distance_sqr[input.clone()],
                    &mean[input],
                    &row[matrix],
                );
            }
        }

        let weights = distance_sqr
            .into_iter()
            .map(|distance_sqr| {
                let variance = distance_sqr / pose_count as f32;
                match variance < MIN_VARIANCE {
                    true => 0.0,
                    false => 1.0 / variance,
                }
            })
            .collect();

        Self::from_weights(weights)
    }

    /// `user weight × normalizer × category multiplier` of every atom.
    pub fn final_weights(
        user: &MotionCalibration,
        std_dev: &CalibrationData,
        layout: &FeatureLayout,
    ) -> Result<Self, SetupError> {
        Self::final_weights_with_ratio(user, std_dev, layout, user.quality_vs_responsiveness)
    }

    /// [`CalibrationData::final_weights`] using another quality vs responsiveness ratio.
    pub fn final_weights_with_ratio(
        user: &MotionCalibration,
        std_dev: &CalibrationData,
        layout: &FeatureLayout,
        ratio: f32,
    ) -> Result<Self, SetupError> {
        let expected = layout.feature_atom_count();
        for found in [user.weights.len(), std_dev.len()] {
            if found != expected {
                return Err(SetupError::CalibrationMismatch { expected, found });
            }
        }

        let weights = user
            .weights
            .iter()
            .zip(std_dev.iter())
            .enumerate()
            .map(|(index, (user_weight, normalizer))| {
                let category = layout.atom_category(index + 1).unwrap_or_default();
                user_weight * normalizer * category_multiplier(category, ratio)
            })
            .collect();

        Ok(Self::from_weights(weights))
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }
}
