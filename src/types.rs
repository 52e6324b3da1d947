use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};

/// エンコード済み画像（PNG/JPEGなど）のバイト列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    bytes: Vec<u8>,
}

impl RawImage {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    /// ファイルから読み込む（デコードはまだ行わない）
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_bytes(std::fs::read(path)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// 1クラス分の学習画像
#[derive(Debug, Clone)]
pub struct ClassImages {
    pub name: String,
    pub images: Vec<RawImage>,
}

impl ClassImages {
    pub fn new(name: impl Into<String>, images: Vec<RawImage>) -> Self {
        Self {
            name: name.into(),
            images,
        }
    }
}

/// クラス名と画像のリスト（入力順がクラスIDの順序になる）
#[derive(Debug, Clone, Default)]
pub struct LabeledImageSet {
    classes: Vec<ClassImages>,
}

impl LabeledImageSet {
    pub fn new(classes: Vec<ClassImages>) -> Self {
        Self { classes }
    }

    /// クラスを末尾に追加
    pub fn push_class(&mut self, name: impl Into<String>, images: Vec<RawImage>) {
        self.classes.push(ClassImages::new(name, images));
    }

    /// ディレクトリから読み込む
    ///
    /// サブディレクトリ1つを1クラスとし、名前順に並べる。
    /// 拡張子が png / jpg / jpeg のファイルのみ対象。
    pub fn from_directory(data_dir: &Path) -> Result<Self> {
        let mut class_dirs = Vec::new();
        for entry in std::fs::read_dir(data_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                class_dirs.push(path);
            }
        }
        class_dirs.sort();

        let mut classes = Vec::with_capacity(class_dirs.len());
        for class_dir in class_dirs {
            let class_name = class_dir
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    Error::InvalidInput(format!("不正なディレクトリ名: {}", class_dir.display()))
                })?
                .to_string();

            let mut image_paths = Vec::new();
            for entry in std::fs::read_dir(&class_dir)? {
                let path = entry?.path();
                if path.is_file() && is_image_file(&path) {
                    image_paths.push(path);
                }
            }
            image_paths.sort();

            let images = image_paths
                .iter()
                .map(RawImage::from_path)
                .collect::<Result<Vec<_>>>()?;

            tracing::debug!(class = %class_name, images = images.len(), "クラスを読み込みました");
            classes.push(ClassImages::new(class_name, images));
        }

        Ok(Self { classes })
    }

    pub fn classes(&self) -> &[ClassImages] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn class_names(&self) -> Vec<String> {
        self.classes.iter().map(|c| c.name.clone()).collect()
    }

    /// クラスごとの画像枚数（クラス順）
    pub fn class_counts(&self) -> Vec<usize> {
        self.classes.iter().map(|c| c.images.len()).collect()
    }

    /// 拡張前の総画像枚数
    pub fn total_images(&self) -> usize {
        self.classes.iter().map(|c| c.images.len()).sum()
    }

    /// 最も少ないクラスの画像枚数（クラスがなければ0）
    pub fn min_class_count(&self) -> usize {
        self.classes.iter().map(|c| c.images.len()).min().unwrap_or(0)
    }

    /// 学習に使えるかを検証
    ///
    /// - クラスが2つ以上
    /// - すべてのクラスに画像が1枚以上
    /// - クラス名の重複なし
    pub fn validate_for_training(&self) -> Result<()> {
        if self.classes.len() < 2 {
            return Err(Error::InvalidInput(format!(
                "学習には2クラス以上が必要です（現在: {}クラス）",
                self.classes.len()
            )));
        }

        let empty: Vec<&str> = self
            .classes
            .iter()
            .filter(|c| c.images.is_empty())
            .map(|c| c.name.as_str())
            .collect();
        if !empty.is_empty() {
            return Err(Error::InvalidInput(format!(
                "画像が1枚もないクラスがあります: {}",
                empty.join(", ")
            )));
        }

        let mut seen = HashSet::new();
        for class in &self.classes {
            if !seen.insert(class.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "クラス名が重複しています: {}",
                    class.name
                )));
            }
        }

        Ok(())
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            ext == "png" || ext == "jpg" || ext == "jpeg"
        })
        .unwrap_or(false)
}

/// エポックごとの学習進捗
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgress {
    /// 完了したエポック（1始まり）
    pub epoch: usize,
    pub total_epochs: usize,
    pub loss: f64,
    pub accuracy: f64,
    /// 検証データがある場合のみ
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
}

/// 推論結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub class_name: String,
    /// softmax確率 [0, 1]
    pub probability: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_set(counts: &[(&str, usize)]) -> LabeledImageSet {
        let mut set = LabeledImageSet::default();
        for (name, count) in counts {
            set.push_class(*name, vec![RawImage::from_bytes(vec![0u8]); *count]);
        }
        set
    }

    #[test]
    fn test_counts() {
        let set = image_set(&[("cat", 3), ("dog", 5)]);
        assert_eq!(set.total_images(), 8);
        assert_eq!(set.class_counts(), vec![3, 5]);
        assert_eq!(set.min_class_count(), 3);
        assert_eq!(set.class_names(), vec!["cat".to_string(), "dog".to_string()]);
    }

    #[test]
    fn test_validate_requires_two_classes() {
        let set = image_set(&[("cat", 3)]);
        assert!(matches!(set.validate_for_training(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_empty_class() {
        let set = image_set(&[("cat", 3), ("dog", 0)]);
        assert!(matches!(set.validate_for_training(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let set = image_set(&[("cat", 3), ("cat", 2)]);
        assert!(matches!(set.validate_for_training(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_from_directory() {
        let dir = std::env::temp_dir().join(format!("local_classifier_types_{}", std::process::id()));
        std::fs::create_dir_all(dir.join("b_dog")).unwrap();
        std::fs::create_dir_all(dir.join("a_cat")).unwrap();
        std::fs::write(dir.join("a_cat").join("1.png"), [1u8, 2, 3]).unwrap();
        std::fs::write(dir.join("a_cat").join("2.JPG"), [4u8]).unwrap();
        std::fs::write(dir.join("a_cat").join("notes.txt"), b"skip").unwrap();
        std::fs::write(dir.join("b_dog").join("1.jpeg"), [5u8]).unwrap();

        let set = LabeledImageSet::from_directory(&dir).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(set.class_names(), vec!["a_cat".to_string(), "b_dog".to_string()]);
        assert_eq!(set.class_counts(), vec![2, 1]);
        assert_eq!(set.classes()[0].images[0].as_bytes(), &[1u8, 2, 3]);
    }
}
