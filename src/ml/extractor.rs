//! 凍結済み特徴抽出器
//!
//! 事前学習済みの埋め込みネットワークを読み込み、正規化画像を固定長の特徴ベクトルへ変換する。
//! 読み込み後は一切更新しない（学習・勾配計算なし）。

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        PaddingConfig2d, Relu,
    },
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Tensor, TensorData},
};

use crate::error::Error;
use crate::ml::preprocess::NormalizedImage;
use crate::model::{load_extractor_bundle, read_extractor_bundle, ExtractorMetadata};

/// 埋め込みネットワーク設定
#[derive(Config, Debug)]
pub struct EmbeddingNetworkConfig {
    /// 最初のブロックのチャネル数（ブロックごとに2倍）
    #[config(default = 16)]
    pub base_channels: usize,
    /// 畳み込みブロック数
    #[config(default = 4)]
    pub num_blocks: usize,
}

impl EmbeddingNetworkConfig {
    /// ネットワークを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> EmbeddingNetwork<B> {
        let mut blocks = Vec::with_capacity(self.num_blocks);
        let mut in_channels = 3;
        for i in 0..self.num_blocks {
            let out_channels = self.base_channels << i;
            // 3x3 / stride 2 / padding 1: サイズは ceil(size / 2)
            blocks.push(
                Conv2dConfig::new([in_channels, out_channels], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device),
            );
            in_channels = out_channels;
        }

        EmbeddingNetwork {
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            activation: Relu::new(),
        }
    }
}

/// 埋め込みネットワーク
///
/// # アーキテクチャ
/// - {Conv 3x3 (stride 2) + ReLU} x num_blocks
/// - Global Average Pooling
/// - 出力: [batch_size, base_channels * 2^(num_blocks - 1)]
#[derive(Module, Debug)]
pub struct EmbeddingNetwork<B: Backend> {
    blocks: Vec<Conv2d<B>>,
    pool: AdaptiveAvgPool2d,
    activation: Relu,
}

impl<B: Backend> EmbeddingNetwork<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - 埋め込み [batch_size, embedding_dim]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for conv in &self.blocks {
            x = self.activation.forward(conv.forward(x));
        }
        let x = self.pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }
}

/// 特徴ベクトル（長さは抽出器の埋め込み次元）
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }
}

/// 凍結済み特徴抽出器
pub struct FeatureExtractor<B: Backend> {
    network: EmbeddingNetwork<B>,
    input_size: usize,
    embedding_dim: usize,
    device: B::Device,
}

impl<B: Backend> FeatureExtractor<B> {
    /// バンドル（tar.gz）から読み込んでウォームアップする
    pub fn load<P: AsRef<Path>>(bundle_path: P, device: &B::Device) -> crate::Result<Self> {
        let (metadata, binary) = load_extractor_bundle(bundle_path.as_ref())?;
        Self::from_parts(&metadata, binary, device)
    }

    /// メモリ上のバンドルから読み込む（ネットワーク越しに取得した場合など）
    pub fn from_bytes(bundle: &[u8], device: &B::Device) -> crate::Result<Self> {
        let (metadata, binary) = read_extractor_bundle(std::io::Cursor::new(bundle))?;
        Self::from_parts(&metadata, binary, device)
    }

    fn from_parts(metadata: &ExtractorMetadata, binary: Vec<u8>, device: &B::Device) -> crate::Result<Self> {
        tracing::info!(
            name = %metadata.name,
            input_size = metadata.input_size,
            "特徴抽出器を読み込みます"
        );

        let network = metadata.network.init::<B>(device);
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = <BinBytesRecorder<FullPrecisionSettings> as Recorder<B>>::load(
            &recorder, binary, device,
        )
        .map_err(|e| Error::ModelLoad(format!("モデル重みの読み込みエラー: {:?}", e)))?;
        let network = network.load_record(record);

        Self::from_network(network, metadata.input_size as usize, device)
    }

    /// 読み込み済みネットワークから作成
    ///
    /// ダミー入力で1回順伝播し、埋め込み次元を確定させる（ウォームアップ）。
    pub fn from_network(
        network: EmbeddingNetwork<B>,
        input_size: usize,
        device: &B::Device,
    ) -> crate::Result<Self> {
        if input_size == 0 {
            return Err(Error::ModelLoad("入力サイズが0です".to_string()));
        }

        let mut extractor = Self {
            network,
            input_size,
            embedding_dim: 0,
            device: device.clone(),
        };

        let warmup = extractor.forward_pixels(NormalizedImage::zeros(input_size).as_slice())?;
        if warmup.is_empty() {
            return Err(Error::ModelLoad("埋め込み次元が0です".to_string()));
        }
        extractor.embedding_dim = warmup.len();

        tracing::info!(
            input_size,
            embedding_dim = extractor.embedding_dim,
            "特徴抽出器のウォームアップが完了しました"
        );

        Ok(extractor)
    }

    /// 正規化画像を特徴ベクトルに変換
    pub fn embed(&self, image: &NormalizedImage) -> crate::Result<FeatureVector> {
        if image.size() != self.input_size {
            return Err(Error::Inference(format!(
                "入力画像サイズが不正です: {}x{} (期待: {}x{})",
                image.size(),
                image.size(),
                self.input_size,
                self.input_size
            )));
        }

        let values = self.forward_pixels(image.as_slice())?;
        if values.len() != self.embedding_dim {
            return Err(Error::Inference(format!(
                "埋め込み次元が不正です: {} (期待: {})",
                values.len(),
                self.embedding_dim
            )));
        }
        Ok(FeatureVector(values))
    }

    /// HWC画素列 → [1, 3, size, size] → 埋め込み
    ///
    /// 中間テンソルはこの関数内で破棄され、ホスト側のVecだけが返る。
    fn forward_pixels(&self, pixels: &[f32]) -> crate::Result<Vec<f32>> {
        let size = self.input_size;
        if pixels.len() != size * size * 3 {
            return Err(Error::Inference(format!(
                "画素数が不正です: {} (期待: {})",
                pixels.len(),
                size * size * 3
            )));
        }

        let data = TensorData::new(pixels.to_vec(), [1, size, size, 3]);
        let images = Tensor::<B, 4>::from_data(data, &self.device).permute([0, 3, 1, 2]);

        let embedding = self.network.forward(images);
        embedding
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| Error::Inference(format!("埋め込みの取得エラー: {:?}", e)))
    }

    /// 重みをバイナリとして書き出す（バンドル作成用）
    pub fn export_weights(&self) -> crate::Result<Vec<u8>> {
        export_network_weights(&self.network)
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// ウォームアップで確定した埋め込み次元
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }
}

/// ネットワークの重みをフル精度のバイナリに変換
pub fn export_network_weights<B: Backend>(network: &EmbeddingNetwork<B>) -> crate::Result<Vec<u8>> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    <BinBytesRecorder<FullPrecisionSettings> as Recorder<B>>::record(
        &recorder,
        network.clone().into_record(),
        (),
    )
    .map_err(|e| Error::Serialization(format!("モデル重みの書き出しエラー: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::save_extractor_bundle;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn small_extractor() -> FeatureExtractor<TestBackend> {
        let device = Default::default();
        let network = EmbeddingNetworkConfig::new()
            .with_base_channels(4)
            .with_num_blocks(2)
            .init::<TestBackend>(&device);
        FeatureExtractor::from_network(network, 16, &device).unwrap()
    }

    #[test]
    fn test_network_config_json_round_trip() {
        let config = EmbeddingNetworkConfig::new().with_base_channels(8).with_num_blocks(3);
        let json = serde_json::to_string(&config).unwrap();
        let restored: EmbeddingNetworkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.base_channels, 8);
        assert_eq!(restored.num_blocks, 3);
    }

    #[test]
    fn test_embedding_dim_discovered_at_warmup() {
        let extractor = small_extractor();
        // 4 << 1
        assert_eq!(extractor.embedding_dim(), 8);
    }

    #[test]
    fn test_embed_returns_fixed_length() {
        let extractor = small_extractor();
        let image = NormalizedImage::from_hwc(16, vec![0.5; 16 * 16 * 3]).unwrap();
        let features = extractor.embed(&image).unwrap();
        assert_eq!(features.len(), extractor.embedding_dim());
    }

    #[test]
    fn test_embed_is_deterministic() {
        let extractor = small_extractor();
        let data = (0..16 * 16 * 3).map(|i| (i % 13) as f32 / 12.0).collect();
        let image = NormalizedImage::from_hwc(16, data).unwrap();
        assert_eq!(extractor.embed(&image).unwrap(), extractor.embed(&image).unwrap());
    }

    #[test]
    fn test_embed_rejects_wrong_size() {
        let extractor = small_extractor();
        let image = NormalizedImage::zeros(8);
        assert!(matches!(extractor.embed(&image), Err(Error::Inference(_))));
    }

    #[test]
    fn test_bundle_round_trip() {
        let extractor = small_extractor();
        let metadata = ExtractorMetadata::new(
            "test-backbone",
            16,
            EmbeddingNetworkConfig::new().with_base_channels(4).with_num_blocks(2),
        );
        let path = std::env::temp_dir().join(format!(
            "local_classifier_extractor_{}.tar.gz",
            std::process::id()
        ));
        save_extractor_bundle(&path, &metadata, &extractor.export_weights().unwrap()).unwrap();

        let device = Default::default();
        let loaded = FeatureExtractor::<TestBackend>::load(&path, &device).unwrap();
        std::fs::remove_file(&path).ok();

        let data = (0..16 * 16 * 3).map(|i| (i % 5) as f32 / 4.0).collect();
        let image = NormalizedImage::from_hwc(16, data).unwrap();
        let a = extractor.embed(&image).unwrap();
        let b = loaded.embed(&image).unwrap();
        assert_eq!(loaded.embedding_dim(), 8);
        for (x, y) in a.as_slice().iter().zip(b.as_slice()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_load_missing_bundle_is_model_load_error() {
        let device = Default::default();
        let result = FeatureExtractor::<TestBackend>::load("does/not/exist.tar.gz", &device);
        assert!(matches!(result, Err(Error::ModelLoad(_))));
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        let device = Default::default();
        let result = FeatureExtractor::<TestBackend>::from_bytes(b"garbage", &device);
        assert!(matches!(result, Err(Error::ModelLoad(_))));
    }
}
