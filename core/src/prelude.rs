use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options accepted by the correlator read path.
///
/// The defaults mirror the upstream library behaviour: all corrections and
/// initial flagging enabled. Drivers that want raw correlator output turn
/// them off explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Phase-rotate each visibility by the baseline's electrical cable
    /// length difference.
    pub correct_cable_len: bool,
    /// Phase the data to the observation pointing centre instead of
    /// leaving it as drift-scan data.
    pub phase_to_pointing_center: bool,
    /// Apply the standard MWA pre-flagging (coarse-channel edges, centre
    /// fine channel, quack time).
    pub flag_init: bool,
    /// Bandwidth flagged at each edge of every coarse channel [Hz].
    pub edge_width_hz: f64,
    /// Seconds flagged at the start of the observation.
    pub start_flag_s: f64,
    /// Seconds flagged at the end of the observation.
    pub end_flag_s: f64,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            correct_cable_len: true,
            phase_to_pointing_center: true,
            flag_init: true,
            edge_width_hz: 80_000.0,
            start_flag_s: 2.0,
            end_flag_s: 0.0,
        }
    }
}

/// Options accepted by the uvfits write path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Fill antenna-table bookkeeping values that the correlator read path
    /// never supplies (GST at midnight, reference date, UT1-UTC, ...).
    pub spoof_nonessential: bool,
    /// Phase drift-scan data to the zenith of the first timestep rather
    /// than refusing to write.
    pub force_phase: bool,
}

/// Common error type for dataset operations.
#[derive(thiserror::Error, Debug)]
pub enum VisError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("FITS format error in {path}: {reason}")]
    Fits { path: PathBuf, reason: String },
    #[error("invalid input file set: {0}")]
    InvalidInputSet(String),
    #[error("missing metadata: {0}")]
    MissingMetadata(String),
    #[error("dataset is not phased; enable force_phase to phase to the first-timestep zenith")]
    NotPhased,
    #[error("dataset is empty; read a correlator file set before writing")]
    EmptyDataset,
    #[error("dataset is already populated; use a fresh handle per file set")]
    AlreadyPopulated,
}

impl VisError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn fits(path: &std::path::Path, reason: impl Into<String>) -> Self {
        Self::Fits {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

pub type VisResult<T> = Result<T, VisError>;
