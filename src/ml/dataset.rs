//! 学習データセットの構築
//!
//! 画像 → 前処理 → （少量データなら拡張） → 特徴抽出 を行い、
//! 特徴行列 X [N, D] とラベルを組み立てる。

use burn::tensor::backend::Backend;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};
use crate::ml::augmentation::Augmenter;
use crate::ml::extractor::FeatureExtractor;
use crate::ml::preprocess::normalize;
use crate::model::AugmentationSettings;
use crate::types::LabeledImageSet;

/// 特徴量データセット（学習1回ごとに作り直す）
#[derive(Debug, Clone)]
pub struct TrainingDataset {
    /// 特徴行列 [rows, feature_dim]（行優先）
    features: Vec<f32>,
    /// 各行のクラスID
    labels: Vec<usize>,
    feature_dim: usize,
    num_classes: usize,
    /// クラスごとの拡張前の画像枚数
    image_counts: Vec<usize>,
    /// デコードに失敗してスキップした画像数
    skipped_images: usize,
}

impl TrainingDataset {
    /// 特徴行列とラベルから作成
    pub fn new(features: Vec<f32>, labels: Vec<usize>, feature_dim: usize, num_classes: usize) -> Result<Self> {
        if labels.is_empty() {
            return Err(Error::EmptyDataset);
        }
        if feature_dim == 0 || features.len() != labels.len() * feature_dim {
            return Err(Error::Inference(format!(
                "特徴行列の形状が不正です: {}要素 / {}行 x {}次元",
                features.len(),
                labels.len(),
                feature_dim
            )));
        }
        if let Some(label) = labels.iter().find(|&&l| l >= num_classes) {
            return Err(Error::InvalidInput(format!(
                "クラスID {} はクラス数 {} の範囲外です",
                label, num_classes
            )));
        }

        let mut image_counts = vec![0; num_classes];
        for &label in &labels {
            image_counts[label] += 1;
        }

        Ok(Self {
            features,
            labels,
            feature_dim,
            num_classes,
            image_counts,
            skipped_images: 0,
        })
    }

    /// 拡張前のクラスごとの画像枚数を設定（未設定なら行数と同じ）
    pub fn with_image_counts(mut self, image_counts: Vec<usize>) -> Result<Self> {
        if image_counts.len() != self.num_classes {
            return Err(Error::InvalidInput(format!(
                "クラスごとの枚数の数 {} がクラス数 {} と一致しません",
                image_counts.len(),
                self.num_classes
            )));
        }
        self.image_counts = image_counts;
        Ok(self)
    }

    pub fn rows(&self) -> usize {
        self.labels.len()
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// 特徴行列 X（行優先）
    pub fn features(&self) -> &[f32] {
        &self.features
    }

    pub fn feature_row(&self, row: usize) -> &[f32] {
        &self.features[row * self.feature_dim..(row + 1) * self.feature_dim]
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// one-hotラベル行列 Y [rows, num_classes]（行優先）
    pub fn one_hot_labels(&self) -> Vec<f32> {
        let mut y = vec![0.0; self.rows() * self.num_classes];
        for (row, &label) in self.labels.iter().enumerate() {
            y[row * self.num_classes + label] = 1.0;
        }
        y
    }

    /// クラスごとの行数
    pub fn label_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_classes];
        for &label in &self.labels {
            counts[label] += 1;
        }
        counts
    }

    pub fn skipped_images(&self) -> usize {
        self.skipped_images
    }

    /// 拡張前のクラスごとの画像枚数
    pub fn image_counts(&self) -> &[usize] {
        &self.image_counts
    }

    /// 拡張前の総画像枚数
    pub fn total_images(&self) -> usize {
        self.image_counts.iter().sum()
    }

    /// 拡張前の最少クラス枚数
    pub fn min_images_per_class(&self) -> usize {
        self.image_counts.iter().copied().min().unwrap_or(0)
    }

    /// 行インデックスを学習用と検証用に分割
    ///
    /// 一度シャッフルしてから末尾の `validation_split` 割合を検証用にする。
    /// 学習用が空になる場合は検証用を作らない。
    pub fn split_indices<R: Rng>(&self, validation_split: f64, rng: &mut R) -> (Vec<usize>, Vec<usize>) {
        let mut indices: Vec<usize> = (0..self.rows()).collect();
        if validation_split <= 0.0 {
            return (indices, Vec::new());
        }

        indices.shuffle(rng);
        let val_len = (self.rows() as f64 * validation_split).floor() as usize;
        if val_len == 0 || val_len >= self.rows() {
            return (indices, Vec::new());
        }

        let val_indices = indices.split_off(self.rows() - val_len);
        (indices, val_indices)
    }

    /// 指定行の特徴とone-hotラベルを取り出す（バッチ作成用）
    pub fn gather(&self, rows: &[usize]) -> (Vec<f32>, Vec<f32>) {
        let mut x = Vec::with_capacity(rows.len() * self.feature_dim);
        let mut y = vec![0.0; rows.len() * self.num_classes];
        for (i, &row) in rows.iter().enumerate() {
            x.extend_from_slice(self.feature_row(row));
            y[i * self.num_classes + self.labels[row]] = 1.0;
        }
        (x, y)
    }
}

/// データセット構築器
pub struct DatasetBuilder<'a, B: Backend> {
    extractor: &'a FeatureExtractor<B>,
    augmenter: Augmenter,
    augmentation: AugmentationSettings,
}

impl<'a, B: Backend> DatasetBuilder<'a, B> {
    pub fn new(extractor: &'a FeatureExtractor<B>, augmentation: AugmentationSettings, augmenter: Augmenter) -> Self {
        Self {
            extractor,
            augmenter,
            augmentation,
        }
    }

    /// 1枚あたりの特徴量数（元画像 + 拡張画像）
    pub fn variants_per_image(&self, total_images: usize) -> usize {
        if total_images < self.augmentation.threshold {
            self.augmentation.variants_per_image.max(1)
        } else {
            1
        }
    }

    /// データセットを構築
    ///
    /// デコードできない画像は警告を出してスキップする。
    /// 1件も特徴量が得られなければ `Error::EmptyDataset`。
    pub fn build(&mut self, images: &LabeledImageSet) -> Result<TrainingDataset> {
        let total_images = images.total_images();
        let variants = self.variants_per_image(total_images);
        let image_size = self.extractor.input_size();
        let feature_dim = self.extractor.embedding_dim();

        tracing::info!(
            total_images,
            classes = images.num_classes(),
            augmentation = variants > 1,
            variants_per_image = variants,
            "データセットを構築します"
        );

        let mut features = Vec::with_capacity(total_images * variants * feature_dim);
        let mut labels = Vec::with_capacity(total_images * variants);
        let mut skipped_images = 0;
        // デコードできた画像の枚数（ハイパーパラメータ選択用）
        let mut decoded_counts = vec![0; images.num_classes()];

        for (class_id, class) in images.classes().iter().enumerate() {
            tracing::debug!(class = %class.name, images = class.images.len(), "クラスを処理中");

            for (image_index, raw) in class.images.iter().enumerate() {
                let normalized = match normalize(raw, image_size) {
                    Ok(normalized) => normalized,
                    Err(Error::Decode(reason)) => {
                        tracing::warn!(
                            class = %class.name,
                            image_index,
                            %reason,
                            "画像を読み込めないためスキップします"
                        );
                        skipped_images += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                decoded_counts[class_id] += 1;

                for variant in 0..variants {
                    let feature = if variant == 0 {
                        self.extractor.embed(&normalized)?
                    } else {
                        // 拡張画像は埋め込み後すぐに破棄される
                        let augmented = self.augmenter.augment(&normalized);
                        self.extractor.embed(&augmented)?
                    };
                    features.extend_from_slice(feature.as_slice());
                    labels.push(class_id);
                }
            }
        }

        if labels.is_empty() {
            tracing::error!("有効な特徴量を1件も抽出できませんでした");
            return Err(Error::EmptyDataset);
        }

        tracing::info!(rows = labels.len(), feature_dim, skipped_images, "特徴量の抽出が完了しました");

        let mut dataset = TrainingDataset::new(features, labels, feature_dim, images.num_classes())?
            .with_image_counts(decoded_counts)?;
        dataset.skipped_images = skipped_images;
        Ok(dataset)
    }
}
