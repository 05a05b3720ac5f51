//! Visibility-dataset core for the MWA correlator conversion tools.
//!
//! The modules cover the full path from legacy correlator output to an
//! interchange file: cfitsio-backed FITS access, metafits and gpubox
//! decoding, read-time corrections, and uvfits serialization around an
//! opaque [`UvData`] handle.

pub mod corrections;
pub mod fits;
pub mod geometry;
pub mod gpubox;
pub mod metafits;
pub mod prelude;
pub mod telemetry;
pub mod uvdata;
mod uvfits;

// Re-exported so downstream crates stay on the same cfitsio linkage.
pub use fitsio;
pub use fitsio_sys;

pub use prelude::{ReadOptions, VisError, VisResult, WriteOptions};
pub use uvdata::UvData;
