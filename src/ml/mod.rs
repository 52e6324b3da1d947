pub mod augmentation;
pub mod dataset;
pub mod extractor;
pub mod inference;
pub mod preprocess;
pub mod training;

pub use augmentation::Augmenter;
pub use dataset::{DatasetBuilder, TrainingDataset};
pub use extractor::{export_network_weights, EmbeddingNetwork, EmbeddingNetworkConfig, FeatureExtractor, FeatureVector};
pub use inference::{predict, predict_batch, predict_features};
pub use preprocess::{normalize, NormalizedImage};
pub use training::{
    argmax, categorical_cross_entropy, check_compatible, select_hyperparameters, ClassifierHead, ClassifierNetwork,
    ClassifierNetworkConfig, ClassifierTrainer, FitRun, Hyperparameters, TrainingOptions,
};
