pub mod observation;

pub use observation::{write_synthetic_observation, SyntheticConfig};
