//! 学習済み分類ヘッドによる推論

use burn::tensor::backend::Backend;

use crate::error::{Error, Result};
use crate::ml::extractor::FeatureExtractor;
use crate::ml::preprocess::normalize;
use crate::ml::training::{argmax, check_compatible, ClassifierHead};
use crate::types::{PredictionResult, RawImage};

/// 画像1枚を分類
///
/// 前処理 → 埋め込み → 分類ヘッド → softmax の最大クラスを返す。
/// ヘッドがなければ `Error::NotTrained`。
pub fn predict<B: Backend>(
    head: Option<&ClassifierHead<B>>,
    extractor: &FeatureExtractor<B>,
    image: &RawImage,
) -> Result<PredictionResult> {
    let head = head.ok_or(Error::NotTrained)?;
    check_compatible(head, extractor)?;

    let normalized = normalize(image, extractor.input_size())?;
    let features = extractor.embed(&normalized)?;
    predict_features(head, features.as_slice())
}

/// 抽出済みの特徴ベクトルを分類
pub fn predict_features<B: Backend>(head: &ClassifierHead<B>, features: &[f32]) -> Result<PredictionResult> {
    let probabilities = head.probabilities(features)?;
    let index = argmax(&probabilities);

    let class_name = head
        .class_names()
        .get(index)
        .cloned()
        .ok_or_else(|| Error::Inference(format!("クラスインデックス {} が範囲外です", index)))?;

    Ok(PredictionResult {
        class_name,
        probability: probabilities[index],
    })
}

/// 複数画像をまとめて分類（1枚でも失敗すればエラー）
pub fn predict_batch<B: Backend>(
    head: Option<&ClassifierHead<B>>,
    extractor: &FeatureExtractor<B>,
    images: &[RawImage],
) -> Result<Vec<PredictionResult>> {
    images.iter().map(|image| predict(head, extractor, image)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::dataset::TrainingDataset;
    use crate::ml::extractor::EmbeddingNetworkConfig;
    use crate::ml::training::{ClassifierTrainer, TrainingOptions};
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    type TestBackend = Autodiff<NdArray<f32>>;
    type InnerBackend = NdArray<f32>;

    fn extractor() -> FeatureExtractor<InnerBackend> {
        let device = Default::default();
        let network = EmbeddingNetworkConfig::new()
            .with_base_channels(4)
            .with_num_blocks(2)
            .init::<InnerBackend>(&device);
        FeatureExtractor::from_network(network, 8, &device).unwrap()
    }

    fn png(shade: u8) -> RawImage {
        let img = RgbImage::from_fn(10, 10, |x, _| Rgb([shade, (x * 10) as u8, 255 - shade]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        RawImage::from_bytes(bytes)
    }

    fn head(feature_dim: usize) -> ClassifierHead<InnerBackend> {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for row in 0..6 {
            let label = row % 2;
            features.extend((0..feature_dim).map(|i| if i % 2 == label { 1.0 } else { 0.0 }));
            labels.push(label);
        }
        let dataset = TrainingDataset::new(features, labels, feature_dim, 2).unwrap();
        ClassifierTrainer::<TestBackend>::new(
            Default::default(),
            TrainingOptions {
                num_epochs: 2,
                batch_size: 4,
                seed: Some(3),
            },
        )
        .train(dataset, vec!["left".into(), "right".into()], |_| {})
        .unwrap()
    }

    #[test]
    fn test_predict_without_head_is_not_trained() {
        let extractor = extractor();
        let result = predict::<InnerBackend>(None, &extractor, &png(10));
        assert!(matches!(result, Err(Error::NotTrained)));
    }

    #[test]
    fn test_not_trained_checked_before_decoding() {
        let extractor = extractor();
        let result = predict::<InnerBackend>(None, &extractor, &RawImage::from_bytes(vec![1, 2, 3]));
        assert!(matches!(result, Err(Error::NotTrained)));
    }

    #[test]
    fn test_predict_is_idempotent() {
        let extractor = extractor();
        let head = head(extractor.embedding_dim());
        let image = png(200);

        let first = predict(Some(&head), &extractor, &image).unwrap();
        let second = predict(Some(&head), &extractor, &image).unwrap();
        assert_eq!(first, second);
        assert!((0.0..=1.0).contains(&first.probability));
        assert!(head.class_names().contains(&first.class_name));
    }

    #[test]
    fn test_predict_reports_decode_error() {
        let extractor = extractor();
        let head = head(extractor.embedding_dim());
        let result = predict(Some(&head), &extractor, &RawImage::from_bytes(vec![0u8; 4]));
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_incompatible_head_is_rejected() {
        let extractor = extractor();
        let head = head(extractor.embedding_dim() + 1);
        let result = predict(Some(&head), &extractor, &png(50));
        assert!(matches!(result, Err(Error::Inference(_))));
    }

    #[test]
    fn test_predict_features_picks_argmax() {
        let head = head(4);
        let result = predict_features(&head, &[1.0, 0.0, 1.0, 0.0]).unwrap();
        let probabilities = head.probabilities(&[1.0, 0.0, 1.0, 0.0]).unwrap();
        assert_eq!(result.class_name, head.class_names()[argmax(&probabilities)]);
        assert_eq!(result.probability, probabilities[argmax(&probabilities)]);
    }

    #[test]
    fn test_predict_batch_preserves_order() {
        let extractor = extractor();
        let head = head(extractor.embedding_dim());
        let images = vec![png(0), png(128), png(255)];
        let batch = predict_batch(Some(&head), &extractor, &images).unwrap();
        assert_eq!(batch.len(), 3);
        for (image, result) in images.iter().zip(&batch) {
            assert_eq!(&predict(Some(&head), &extractor, image).unwrap(), result);
        }
    }
}
