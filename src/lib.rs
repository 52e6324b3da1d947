//! 端末上で動く転移学習型の画像分類器
//!
//! 凍結済みの特徴抽出器で画像を埋め込みベクトルに変換し、
//! その上に小さな分類ヘッドだけを学習する。

pub mod engine;
pub mod error;
pub mod ml;
pub mod model;
pub mod types;

pub use engine::{TrainingEngine, TrainingRun, TrainingStatus, TrainingSummary};
pub use error::{Error, Result};
pub use ml::{ClassifierHead, FeatureExtractor, Hyperparameters, NormalizedImage, TrainingDataset};
pub use model::{DeviceType, EngineConfig, TrainingSnapshot};
pub use types::{ClassImages, LabeledImageSet, PredictionResult, RawImage, TrainingProgress};
