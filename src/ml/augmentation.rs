//! 少量データ向けのデータ拡張
//!
//! 正規化済み画像に対して、左右反転・明るさ・コントラストをランダムに変化させる。
//! 学習データの水増しにのみ使用し、推論時には使わない。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ml::preprocess::NormalizedImage;

const FLIP_PROBABILITY: f64 = 0.5;
const BRIGHTNESS_RANGE: (f32, f32) = (0.9, 1.1);
const CONTRAST_RANGE: (f32, f32) = (0.8, 1.2);

/// ランダム拡張器
pub struct Augmenter {
    rng: StdRng,
}

impl Augmenter {
    /// エントロピーから初期化（呼び出しごとに結果が変わる）
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// シード固定（再現性が必要な場合）
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// 拡張した画像を返す
    ///
    /// 1. 50%の確率で左右反転
    /// 2. 明るさ倍率 [0.9, 1.1]
    /// 3. コントラスト `(p - mean) * factor + mean`、factor は [0.8, 1.2]
    /// 4. [0, 1] にクリップ
    pub fn augment(&mut self, image: &NormalizedImage) -> NormalizedImage {
        let mut augmented = if self.rng.gen_bool(FLIP_PROBABILITY) {
            image.flip_horizontal()
        } else {
            image.clone()
        };

        let brightness = self.rng.gen_range(BRIGHTNESS_RANGE.0..=BRIGHTNESS_RANGE.1);
        for v in augmented.as_mut_slice() {
            *v *= brightness;
        }

        // 平均は明るさ調整後の画像で計算する
        let contrast = self.rng.gen_range(CONTRAST_RANGE.0..=CONTRAST_RANGE.1);
        let mean = augmented.mean();
        for v in augmented.as_mut_slice() {
            *v = ((*v - mean) * contrast + mean).clamp(0.0, 1.0);
        }

        augmented
    }
}

impl Default for Augmenter {
    fn default() -> Self {
        Self::new()
    }
}
