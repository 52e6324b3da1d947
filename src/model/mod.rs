pub mod model_metadata;
pub mod model_storage;
pub mod snapshot;
pub mod config;

pub use model_metadata::ExtractorMetadata;
pub use model_storage::{save_extractor_bundle, load_extractor_bundle, read_extractor_bundle};
pub use snapshot::{TrainingSnapshot, is_stale};
pub use config::{EngineConfig, DeviceType, AugmentationSettings};
