//! 特徴抽出器バンドルのメタデータ
//!
//! tar.gz形式で抽出器の重みと一緒に保存されます。

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ml::EmbeddingNetworkConfig;

/// 特徴抽出器メタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: ネットワークの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorMetadata {
    /// 抽出器の名前（表示・ログ用）
    pub name: String,

    /// 入力画像サイズ（正方形）
    pub input_size: u32,

    /// ネットワーク構成
    pub network: EmbeddingNetworkConfig,

    /// 作成日時（RFC3339形式）
    pub created_at: String,
}

impl ExtractorMetadata {
    /// 新しいメタデータを作成
    pub fn new(name: impl Into<String>, input_size: u32, network: EmbeddingNetworkConfig) -> Self {
        Self {
            name: name.into(),
            input_size,
            network,
            created_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
