//! 画像の前処理
//!
//! デコード → 中央の正方形を切り出し → 指定サイズへリサイズ → [0, 1] へ正規化

use image::imageops::FilterType;

use crate::error::{Error, Result};
use crate::types::RawImage;

/// 正規化済み画像 (size x size x 3, HWC順, 値域 [0, 1])
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    size: usize,
    data: Vec<f32>,
}

impl NormalizedImage {
    /// HWC順のピクセル値から作成
    pub fn from_hwc(size: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != size * size * 3 {
            return Err(Error::Inference(format!(
                "画素数が不正です: {} (期待: {}x{}x3 = {})",
                data.len(),
                size,
                size,
                size * size * 3
            )));
        }
        Ok(Self { size, data })
    }

    /// 全画素0の画像（ウォームアップ用）
    pub fn zeros(size: usize) -> Self {
        Self {
            size,
            data: vec![0.0; size * size * 3],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// 画素値 (x, y, channel)。範囲外なら `None`
    pub fn get(&self, x: usize, y: usize, channel: usize) -> Option<f32> {
        if x >= self.size || y >= self.size || channel >= 3 {
            return None;
        }
        self.data.get((y * self.size + x) * 3 + channel).copied()
    }

    /// 左右反転した画像を返す
    pub fn flip_horizontal(&self) -> Self {
        let size = self.size;
        let mut data = Vec::with_capacity(self.data.len());
        for y in 0..size {
            for x in (0..size).rev() {
                let offset = (y * size + x) * 3;
                data.extend_from_slice(&self.data[offset..offset + 3]);
            }
        }
        Self { size, data }
    }

    /// 全画素・全チャネルの平均
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }
}

/// 画像を読み込んで正規化
///
/// # 引数
/// - `image`: エンコード済み画像
/// - `size`: 出力サイズ（正方形）
///
/// # 戻り値
/// - `size x size x 3` の正規化画像。デコードできない場合は `Error::Decode`
pub fn normalize(image: &RawImage, size: usize) -> Result<NormalizedImage> {
    if size == 0 {
        return Err(Error::InvalidInput("出力サイズは1以上が必要です".to_string()));
    }

    let img = image::load_from_memory(image.as_bytes())?;
    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return Err(Error::Decode(format!("画像サイズが不正です: {}x{}", width, height)));
    }

    // 中央の正方形を切り出す
    let side = width.min(height);
    let offset_x = (width - side) / 2;
    let offset_y = (height - side) / 2;
    let cropped = img.crop_imm(offset_x, offset_y, side, side);

    let resized = cropped
        .resize_exact(size as u32, size as u32, FilterType::Triangle)
        .to_rgb8();

    let data = resized
        .as_raw()
        .iter()
        .map(|&v| v as f32 / 255.0)
        .collect::<Vec<f32>>();

    NormalizedImage::from_hwc(size, data)
}
