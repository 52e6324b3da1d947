//! 学習エンジンのエラー定義

use thiserror::Error;

/// 学習エンジン共通のエラー
#[derive(Error, Debug)]
pub enum Error {
    /// 画像をデコードできない（データセット構築時はスキップされる）
    #[error("画像のデコードに失敗しました: {0}")]
    Decode(String),

    /// 特徴抽出モデルの読み込み失敗
    #[error("特徴抽出モデルの読み込みに失敗しました: {0}")]
    ModelLoad(String),

    /// 有効な特徴量が1件も得られなかった
    #[error("学習データから特徴量を1件も抽出できませんでした")]
    EmptyDataset,

    /// 学習前の入力検証エラー
    #[error("入力が不正です: {0}")]
    InvalidInput(String),

    /// 学習中に再度学習が要求された
    #[error("既に学習中です")]
    AlreadyTraining,

    /// 学習済みモデルがない状態で推論が要求された
    #[error("モデルが学習されていません")]
    NotTrained,

    /// テンソル形状の不一致など推論時のエラー
    #[error("推論エラー: {0}")]
    Inference(String),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("シリアライズエラー: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Decode(err.to_string())
    }
}

/// 学習エンジン用のResult型
pub type Result<T> = std::result::Result<T, Error>;
