use thiserror::Error;

/// Fatal errors of offline database building.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("No motion clips were provided.")]
    NoClips,
    #[error("Motion match config has no features.")]
    NoFeatures,
    #[error("Clip '{name}' has an invalid length ({length}).")]
    InvalidClipLength { name: String, length: f32 },
    #[error("Invalid motion match config: {0}")]
    Setup(#[from] SetupError),
}

/// Configuration errors detected before a database or node is used.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Feature {index} is invalid: {reason}")]
    InvalidFeature { index: usize, reason: String },
    #[error("Calibration has {found} weights but the config expects {expected}.")]
    CalibrationMismatch { expected: usize, found: usize },
    #[error("Calibration quality vs responsiveness ratio must be within [0, 1], got {0}.")]
    InvalidRatio(f32),
    #[error("Motion database has no poses.")]
    EmptyDatabase,
    #[error("Motion database has no calibration for traits {0:#x}.")]
    MissingCalibration(u64),
    #[error("Invalid k-means settings: {0}")]
    InvalidClustering(&'static str),
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MotionDatabaseLoaderError {
    #[error("Could not load json file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not deserialize using serde: {0}")]
    Serde(#[from] serde_json::Error),
}
