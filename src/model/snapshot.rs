//! 学習時点のデータスナップショット
//!
//! 最後に成功した学習で使ったクラス構成と枚数を記録し、
//! 現在のデータと比べて再学習が必要か（stale）を判定します。

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::LabeledImageSet;

/// 学習スナップショット
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSnapshot {
    /// 学習を実行したプロジェクトの識別子（エンジンは解釈しない）
    pub project_id: String,

    /// クラス名（学習時の順序）
    pub class_names: Vec<String>,

    /// クラスごとの画像枚数（class_namesと同じ順序）
    pub image_counts: Vec<usize>,

    /// 総画像枚数（拡張前）
    pub total_images: usize,

    /// 学習完了時刻（RFC3339形式）
    pub trained_at: String,
}

impl TrainingSnapshot {
    /// 学習成功時点の枚数を記録
    pub fn capture(
        project_id: impl Into<String>,
        class_names: Vec<String>,
        image_counts: Vec<usize>,
    ) -> Result<Self> {
        if class_names.len() != image_counts.len() {
            return Err(Error::InvalidInput(format!(
                "クラス名と枚数の数が一致しません: {} / {}",
                class_names.len(),
                image_counts.len()
            )));
        }

        let total_images = image_counts.iter().sum();
        Ok(Self {
            project_id: project_id.into(),
            class_names,
            image_counts,
            total_images,
            trained_at: chrono::Local::now().to_rfc3339(),
        })
    }

    /// 画像セットからそのまま記録
    pub fn from_images(project_id: impl Into<String>, images: &LabeledImageSet) -> Self {
        Self {
            project_id: project_id.into(),
            class_names: images.class_names(),
            image_counts: images.class_counts(),
            total_images: images.total_images(),
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// 現在のデータに対して学習済みモデルが古くなっているか
    ///
    /// 以下のいずれかで true:
    /// - クラス数が違う
    /// - クラス名の集合が違う（順不同、大文字小文字は区別）
    /// - 総画像枚数が違う
    /// - 同名クラスの画像枚数が違う
    pub fn is_stale(&self, current: &LabeledImageSet) -> bool {
        if self.class_names.len() != current.num_classes() {
            tracing::debug!("クラス数が変化しました");
            return true;
        }

        let previous_names: HashSet<&str> = self.class_names.iter().map(String::as_str).collect();
        let current_names: HashSet<&str> = current.classes().iter().map(|c| c.name.as_str()).collect();
        if previous_names != current_names {
            tracing::debug!("クラス名が変化しました");
            return true;
        }

        if self.total_images != current.total_images() {
            tracing::debug!(
                previous = self.total_images,
                current = current.total_images(),
                "総画像枚数が変化しました"
            );
            return true;
        }

        let previous_counts: HashMap<&str, usize> = self
            .class_names
            .iter()
            .map(String::as_str)
            .zip(self.image_counts.iter().copied())
            .collect();
        for class in current.classes() {
            if previous_counts.get(class.name.as_str()) != Some(&class.images.len()) {
                tracing::debug!(class = %class.name, "クラスの画像枚数が変化しました");
                return true;
            }
        }

        false
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_string(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// JSONファイルに保存
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// JSONファイルから読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_string(&content)
    }
}

/// スナップショットがなければ「古くない」（未学習は別の状態として扱う）
pub fn is_stale(snapshot: Option<&TrainingSnapshot>, current: &LabeledImageSet) -> bool {
    snapshot.map(|s| s.is_stale(current)).unwrap_or(false)
}
