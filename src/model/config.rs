//! エンジン設定管理モジュール
//!
//! 計算デバイスや学習設定などをJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// データ拡張の適用条件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AugmentationSettings {
    /// 総画像枚数がこの値未満なら拡張する
    pub threshold: usize,
    /// 拡張時に1枚から作る特徴量の数（元画像を含む）
    pub variants_per_image: usize,
}

impl Default for AugmentationSettings {
    fn default() -> Self {
        Self {
            threshold: 50,
            variants_per_image: 3,
        }
    }
}

/// エンジン設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// 特徴抽出器バンドルのパス
    pub extractor_path: String,
    /// 前処理後の画像サイズ（正方形）
    pub image_size: usize,
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// データ拡張設定
    #[serde(default)]
    pub augmentation: AugmentationSettings,
    /// ランダムシード（未指定なら毎回ランダム）
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::default(),
            extractor_path: "models/feature_extractor.tar.gz".to_string(),
            image_size: 128,
            num_epochs: 50,
            batch_size: 32,
            augmentation: AugmentationSettings::default(),
            seed: None,
        }
    }
}

impl EngineConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// デフォルトパスから設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "設定ファイルを読み込みました");
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "設定ファイルの読み込みに失敗しました。デフォルト設定を使用します"
                    );
                    Self::default()
                }
            }
        } else {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定情報をログに出力
    pub fn log_summary(&self) {
        tracing::info!(
            device = %self.device_type,
            extractor = %self.extractor_path,
            image_size = self.image_size,
            epochs = self.num_epochs,
            batch_size = self.batch_size,
            augmentation_threshold = self.augmentation.threshold,
            variants_per_image = self.augmentation.variants_per_image,
            seed = ?self.seed,
            "エンジン設定"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.image_size, 128);
        assert_eq!(config.num_epochs, 50);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.augmentation.threshold, 50);
        assert_eq!(config.augmentation.variants_per_image, 3);
    }

    #[test]
    fn test_serialize_deserialize() {
        let mut config = EngineConfig::default();
        config.seed = Some(9);
        config.device_type = DeviceType::Cpu;
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: EngineConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.device_type, DeviceType::Cpu);
        assert_eq!(deserialized.seed, Some(9));
        assert_eq!(deserialized.augmentation, config.augmentation);
    }

    #[test]
    fn test_missing_optional_fields_use_defaults() {
        let json = r#"{"extractor_path":"x.tar.gz","image_size":64,"num_epochs":5,"batch_size":8}"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.augmentation, AugmentationSettings::default());
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
