//! 分類ヘッドの学習
//!
//! 特徴量データセットに対して小さな全結合ネットワークを学習する。
//! 構成とハイパーパラメータはデータ量から決める。

use burn::{
    config::Config,
    module::{AutodiffModule, Module},
    nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu},
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        activation::{log_softmax, softmax},
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor, TensorData,
    },
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::ml::dataset::TrainingDataset;
use crate::ml::extractor::FeatureExtractor;
use crate::types::TrainingProgress;

/// 1層目のユニット数の下限・上限
pub const HIDDEN1_MIN: usize = 128;
pub const HIDDEN1_MAX: usize = 256;
/// 画像1枚あたりの1層目ユニット数
pub const HIDDEN1_UNITS_PER_IMAGE: usize = 4;
/// これ未満は少量データ扱い（ドロップアウト弱め）
pub const SMALL_DATASET_IMAGES: usize = 50;
/// これ未満は学習率を上げる
pub const FAST_LEARNING_IMAGES: usize = 20;
/// 検証データを取り分けるのに必要な1クラスあたりの最少枚数
pub const VALIDATION_MIN_PER_CLASS: usize = 10;

/// データ量から決まる学習設定
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub hidden1: usize,
    pub hidden2: usize,
    pub dropout1: f64,
    pub dropout2: f64,
    pub learning_rate: f64,
    pub validation_split: f64,
}

/// ハイパーパラメータを選択
///
/// # 引数
/// - `total_images`: 拡張前の総画像枚数
/// - `min_per_class`: 拡張前の最少クラス枚数
pub fn select_hyperparameters(total_images: usize, min_per_class: usize) -> Hyperparameters {
    let hidden1 = total_images
        .saturating_mul(HIDDEN1_UNITS_PER_IMAGE)
        .clamp(HIDDEN1_MIN, HIDDEN1_MAX);
    let hidden2 = hidden1 / 2;

    let dropout1 = if total_images < SMALL_DATASET_IMAGES { 0.3 } else { 0.5 };
    let dropout2 = dropout1 / 2.0;

    let learning_rate = if total_images < FAST_LEARNING_IMAGES { 0.001 } else { 0.0001 };

    // データが少なすぎるときは検証用に取り分けない
    let validation_split = if min_per_class >= VALIDATION_MIN_PER_CLASS { 0.2 } else { 0.0 };

    Hyperparameters {
        hidden1,
        hidden2,
        dropout1,
        dropout2,
        learning_rate,
        validation_split,
    }
}

/// 分類ヘッド設定
#[derive(Config, Debug)]
pub struct ClassifierNetworkConfig {
    /// 入力次元（埋め込み次元）
    pub input_dim: usize,
    /// 分類クラス数
    pub num_classes: usize,
    pub hidden1: usize,
    pub hidden2: usize,
    #[config(default = 0.5)]
    pub dropout1: f64,
    #[config(default = 0.25)]
    pub dropout2: f64,
}

impl ClassifierNetworkConfig {
    pub fn from_hyperparameters(input_dim: usize, num_classes: usize, hp: &Hyperparameters) -> Self {
        Self::new(input_dim, num_classes, hp.hidden1, hp.hidden2)
            .with_dropout1(hp.dropout1)
            .with_dropout2(hp.dropout2)
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassifierNetwork<B> {
        ClassifierNetwork {
            fc1: LinearConfig::new(self.input_dim, self.hidden1).init(device),
            dropout1: DropoutConfig::new(self.dropout1).init(),
            fc2: LinearConfig::new(self.hidden1, self.hidden2).init(device),
            dropout2: DropoutConfig::new(self.dropout2).init(),
            output: LinearConfig::new(self.hidden2, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 分類ヘッド
///
/// # アーキテクチャ
/// - FC: D -> hidden1 + ReLU + Dropout
/// - FC: hidden1 -> hidden2 + ReLU + Dropout
/// - FC: hidden2 -> num_classes
/// - Softmax (分類時)
#[derive(Module, Debug)]
pub struct ClassifierNetwork<B: Backend> {
    fc1: Linear<B>,
    dropout1: Dropout,
    fc2: Linear<B>,
    dropout2: Dropout,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ClassifierNetwork<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `features`: [batch_size, input_dim]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.fc1.forward(features);
        let x = self.activation.forward(x);
        let x = self.dropout1.forward(x);

        let x = self.fc2.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout2.forward(x);

        self.output.forward(x)
    }

    /// softmax確率 [batch_size, num_classes]
    pub fn forward_probabilities(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        softmax(self.forward(features), 1)
    }
}

/// one-hotラベルに対するカテゴリカル交差エントロピー（バッチ平均）
pub fn categorical_cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    (targets * log_softmax(logits, 1)).sum_dim(1).mean().neg()
}

/// 学習済み分類ヘッドとクラス名の対応
pub struct ClassifierHead<B: Backend> {
    network: ClassifierNetwork<B>,
    class_names: Vec<String>,
    feature_dim: usize,
    hyperparameters: Hyperparameters,
    device: B::Device,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(
        network: ClassifierNetwork<B>,
        class_names: Vec<String>,
        feature_dim: usize,
        hyperparameters: Hyperparameters,
        device: B::Device,
    ) -> Self {
        Self {
            network,
            class_names,
            feature_dim,
            hyperparameters,
            device,
        }
    }

    /// クラス名（インデックス = 出力の列）
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    /// 特徴ベクトル1件に対するsoftmax確率
    pub fn probabilities(&self, features: &[f32]) -> crate::Result<Vec<f32>> {
        if features.len() != self.feature_dim {
            return Err(Error::Inference(format!(
                "特徴量の次元が不正です: {} (期待: {})",
                features.len(),
                self.feature_dim
            )));
        }

        let input = Tensor::<B, 2>::from_data(
            TensorData::new(features.to_vec(), [1, self.feature_dim]),
            &self.device,
        );
        let probabilities = self
            .network
            .forward_probabilities(input)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| Error::Inference(format!("推論結果の取得エラー: {:?}", e)))?;

        if probabilities.len() != self.class_names.len() {
            return Err(Error::Inference(format!(
                "出力クラス数が不正です: {} (期待: {})",
                probabilities.len(),
                self.class_names.len()
            )));
        }
        Ok(probabilities)
    }
}

/// 学習オプション
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingOptions {
    pub num_epochs: usize,
    pub batch_size: usize,
    /// シャッフル・検証分割用のシード
    pub seed: Option<u64>,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            num_epochs: 50,
            batch_size: 32,
            seed: None,
        }
    }
}

/// 分類ヘッドの学習器
pub struct ClassifierTrainer<B: AutodiffBackend> {
    device: B::Device,
    options: TrainingOptions,
}

impl<B: AutodiffBackend> ClassifierTrainer<B> {
    pub fn new(device: B::Device, options: TrainingOptions) -> Self {
        Self { device, options }
    }

    pub fn options(&self) -> &TrainingOptions {
        &self.options
    }

    /// 学習を開始し、エポック単位で進められる `FitRun` を返す
    pub fn start(
        &self,
        dataset: TrainingDataset,
        class_names: Vec<String>,
    ) -> crate::Result<FitRun<B, impl Optimizer<ClassifierNetwork<B>, B>>> {
        if class_names.len() < 2 {
            return Err(Error::InvalidInput(format!(
                "学習には2クラス以上が必要です（現在: {}クラス）",
                class_names.len()
            )));
        }
        if class_names.len() != dataset.num_classes() {
            return Err(Error::InvalidInput(format!(
                "クラス名の数 {} とデータセットのクラス数 {} が一致しません",
                class_names.len(),
                dataset.num_classes()
            )));
        }
        let empty: Vec<&str> = dataset
            .label_counts()
            .iter()
            .zip(&class_names)
            .filter(|(count, _)| **count == 0)
            .map(|(_, name)| name.as_str())
            .collect();
        if !empty.is_empty() {
            return Err(Error::InvalidInput(format!(
                "学習に使える画像が1枚もないクラスがあります: {}",
                empty.join(", ")
            )));
        }
        if self.options.batch_size == 0 || self.options.num_epochs == 0 {
            return Err(Error::InvalidInput(
                "エポック数とバッチサイズは1以上が必要です".to_string(),
            ));
        }

        let hyperparameters =
            select_hyperparameters(dataset.total_images(), dataset.min_images_per_class());
        tracing::info!(
            hidden1 = hyperparameters.hidden1,
            hidden2 = hyperparameters.hidden2,
            dropout1 = hyperparameters.dropout1,
            dropout2 = hyperparameters.dropout2,
            learning_rate = hyperparameters.learning_rate,
            validation_split = hyperparameters.validation_split,
            "ハイパーパラメータを選択しました"
        );

        let mut rng = match self.options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (train_rows, val_rows) = dataset.split_indices(hyperparameters.validation_split, &mut rng);
        tracing::info!(train = train_rows.len(), validation = val_rows.len(), "学習データを分割しました");

        let model = ClassifierNetworkConfig::from_hyperparameters(
            dataset.feature_dim(),
            dataset.num_classes(),
            &hyperparameters,
        )
        .init::<B>(&self.device);
        let optimizer = AdamConfig::new().init::<B, ClassifierNetwork<B>>();

        Ok(FitRun {
            model,
            optimizer,
            dataset,
            class_names,
            hyperparameters,
            train_rows,
            val_rows,
            num_epochs: self.options.num_epochs,
            batch_size: self.options.batch_size,
            epoch: 0,
            rng,
            device: self.device.clone(),
            last_progress: None,
            failed: false,
        })
    }

    /// 最後まで学習し、エポックごとに `on_progress` を呼ぶ
    pub fn train<F>(
        &self,
        dataset: TrainingDataset,
        class_names: Vec<String>,
        mut on_progress: F,
    ) -> crate::Result<ClassifierHead<B::InnerBackend>>
    where
        F: FnMut(&TrainingProgress),
    {
        let mut run = self.start(dataset, class_names)?;
        for progress in run.by_ref() {
            on_progress(&progress?);
        }
        run.finish()
    }
}

/// 実行中の学習
///
/// `Iterator` として1エポックずつ進み、各エポック後の進捗を返す。
/// 途中で中断する手段はなく、破棄すれば結果を捨てたことになる。
pub struct FitRun<B: AutodiffBackend, O> {
    model: ClassifierNetwork<B>,
    optimizer: O,
    dataset: TrainingDataset,
    class_names: Vec<String>,
    hyperparameters: Hyperparameters,
    train_rows: Vec<usize>,
    val_rows: Vec<usize>,
    num_epochs: usize,
    batch_size: usize,
    epoch: usize,
    rng: StdRng,
    device: B::Device,
    last_progress: Option<TrainingProgress>,
    failed: bool,
}

impl<B: AutodiffBackend, O: Optimizer<ClassifierNetwork<B>, B>> FitRun<B, O> {
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    pub fn total_epochs(&self) -> usize {
        self.num_epochs
    }

    pub fn epochs_completed(&self) -> usize {
        self.epoch
    }

    pub fn last_progress(&self) -> Option<&TrainingProgress> {
        self.last_progress.as_ref()
    }

    /// 学習データの行数（拡張込み）
    pub fn dataset_rows(&self) -> usize {
        self.dataset.rows()
    }

    /// 残りのエポックを実行して分類ヘッドを返す
    pub fn finish(mut self) -> crate::Result<ClassifierHead<B::InnerBackend>> {
        while let Some(progress) = self.next() {
            progress?;
        }
        if self.failed {
            return Err(Error::Inference("失敗したエポックがあるため分類ヘッドを作成できません".to_string()));
        }

        let network = self.model.valid();
        tracing::info!(
            epochs = self.epoch,
            classes = self.class_names.len(),
            "分類ヘッドの学習が完了しました"
        );

        Ok(ClassifierHead::new(
            network,
            self.class_names,
            self.dataset.feature_dim(),
            self.hyperparameters,
            self.device,
        ))
    }

    fn run_epoch(&mut self) -> crate::Result<TrainingProgress> {
        let feature_dim = self.dataset.feature_dim();
        let num_classes = self.dataset.num_classes();

        let mut rows = std::mem::take(&mut self.train_rows);
        rows.shuffle(&mut self.rng);

        let mut loss_sum = 0.0;
        let mut correct = 0;
        for batch in rows.chunks(self.batch_size) {
            let (x, y) = self.dataset.gather(batch);
            let x = Tensor::<B, 2>::from_data(TensorData::new(x, [batch.len(), feature_dim]), &self.device);
            let y = Tensor::<B, 2>::from_data(TensorData::new(y, [batch.len(), num_classes]), &self.device);

            let logits = self.model.forward(x);
            let loss = categorical_cross_entropy(logits.clone(), y);
            let loss_value: f64 = loss.clone().into_scalar().elem();

            correct += count_correct(logits, batch, &self.dataset)?;
            loss_sum += loss_value * batch.len() as f64;

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self
                .optimizer
                .step(self.hyperparameters.learning_rate, self.model.clone(), grads);
        }

        let train_len = rows.len().max(1) as f64;
        let loss = loss_sum / train_len;
        let accuracy = correct as f64 / train_len;
        self.train_rows = rows;

        let (val_loss, val_accuracy) = if self.val_rows.is_empty() {
            (None, None)
        } else {
            let (loss, accuracy) = self.evaluate()?;
            (Some(loss), Some(accuracy))
        };

        self.epoch += 1;
        let progress = TrainingProgress {
            epoch: self.epoch,
            total_epochs: self.num_epochs,
            loss,
            accuracy,
            val_loss,
            val_accuracy,
        };

        tracing::info!(
            epoch = progress.epoch,
            total = progress.total_epochs,
            loss = progress.loss,
            accuracy = progress.accuracy,
            val_loss = ?progress.val_loss,
            val_accuracy = ?progress.val_accuracy,
            "エポック完了"
        );

        Ok(progress)
    }

    /// 検証データで損失と正解率を計算（ドロップアウトなし）
    fn evaluate(&self) -> crate::Result<(f64, f64)> {
        let model = self.model.valid();
        let device = self.device.clone();
        let feature_dim = self.dataset.feature_dim();
        let num_classes = self.dataset.num_classes();

        let (x, y) = self.dataset.gather(&self.val_rows);
        let rows = self.val_rows.len();
        let x = Tensor::<B::InnerBackend, 2>::from_data(TensorData::new(x, [rows, feature_dim]), &device);
        let y = Tensor::<B::InnerBackend, 2>::from_data(TensorData::new(y, [rows, num_classes]), &device);

        let logits = model.forward(x);
        let loss: f64 = categorical_cross_entropy(logits.clone(), y).into_scalar().elem();
        let correct = count_correct(logits, &self.val_rows, &self.dataset)?;

        Ok((loss, correct as f64 / rows as f64))
    }
}

impl<B: AutodiffBackend, O: Optimizer<ClassifierNetwork<B>, B>> Iterator for FitRun<B, O> {
    type Item = crate::Result<TrainingProgress>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.epoch >= self.num_epochs {
            return None;
        }
        let result = self.run_epoch();
        if let Ok(progress) = &result {
            self.last_progress = Some(progress.clone());
        } else {
            // エラー後は続行しない
            self.epoch = self.num_epochs;
            self.failed = true;
        }
        Some(result)
    }
}

/// ロジットの最大列とラベルが一致した行数
fn count_correct<B: Backend>(logits: Tensor<B, 2>, rows: &[usize], dataset: &TrainingDataset) -> crate::Result<usize> {
    let [batch_size, num_classes] = logits.dims();
    let values = logits
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Inference(format!("出力の取得エラー: {:?}", e)))?;

    let labels = dataset.labels();
    let correct = (0..batch_size)
        .filter(|&i| argmax(&values[i * num_classes..(i + 1) * num_classes]) == labels[rows[i]])
        .count();
    Ok(correct)
}

/// 最大値のインデックス（同値なら先頭）
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// 特徴抽出器と分類ヘッドの埋め込み次元が一致しているか
pub fn check_compatible<B: Backend>(head: &ClassifierHead<B>, extractor: &FeatureExtractor<B>) -> crate::Result<()> {
    if head.feature_dim() != extractor.embedding_dim() {
        return Err(Error::Inference(format!(
            "分類ヘッドの入力次元 {} と特徴抽出器の埋め込み次元 {} が一致しません",
            head.feature_dim(),
            extractor.embedding_dim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_autodiff::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray<f32>>;

    /// クラスごとに離れた位置に集まる特徴量
    fn separable_dataset(per_class: usize) -> TrainingDataset {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for class in 0..2 {
            for i in 0..per_class {
                let jitter = (i % 5) as f32 * 0.01;
                if class == 0 {
                    features.extend_from_slice(&[1.0 + jitter, 0.0, 0.2, 0.0]);
                } else {
                    features.extend_from_slice(&[0.0, 1.0 + jitter, 0.0, 0.2]);
                }
                labels.push(class);
            }
        }
        TrainingDataset::new(features, labels, 4, 2).unwrap()
    }

    fn trainer(num_epochs: usize) -> ClassifierTrainer<TestBackend> {
        ClassifierTrainer::new(
            Default::default(),
            TrainingOptions {
                num_epochs,
                batch_size: 8,
                seed: Some(42),
            },
        )
    }

    #[test]
    fn test_hyperparameters_for_tiny_dataset() {
        let hp = select_hyperparameters(10, 5);
        assert_eq!(hp.hidden1, 128);
        assert_eq!(hp.hidden2, 64);
        assert_eq!(hp.dropout1, 0.3);
        assert_eq!(hp.dropout2, 0.15);
        assert_eq!(hp.learning_rate, 0.001);
        assert_eq!(hp.validation_split, 0.0);
    }

    #[test]
    fn test_hyperparameters_for_large_dataset() {
        let hp = select_hyperparameters(200, 100);
        assert_eq!(hp.hidden1, 256);
        assert_eq!(hp.hidden2, 128);
        assert_eq!(hp.dropout1, 0.5);
        assert_eq!(hp.dropout2, 0.25);
        assert_eq!(hp.learning_rate, 0.0001);
        assert_eq!(hp.validation_split, 0.2);
    }

    #[test]
    fn test_hyperparameters_between_bounds() {
        let hp = select_hyperparameters(40, 9);
        assert_eq!(hp.hidden1, 160);
        assert_eq!(hp.hidden2, 80);
        assert_eq!(hp.dropout1, 0.3);
        assert_eq!(hp.learning_rate, 0.0001);
        assert_eq!(hp.validation_split, 0.0);
    }

    #[test]
    fn test_validation_split_threshold() {
        assert_eq!(select_hyperparameters(60, 10).validation_split, 0.2);
        assert_eq!(select_hyperparameters(60, 9).validation_split, 0.0);
    }

    #[test]
    fn test_argmax_prefers_first_maximum() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.1, 0.2, 0.7]), 2);
    }

    #[test]
    fn test_cross_entropy_of_confident_prediction_is_small() {
        let device = Default::default();
        let logits = Tensor::<NdArray<f32>, 2>::from_data(TensorData::new(vec![10.0f32, -10.0], [1, 2]), &device);
        let targets = Tensor::<NdArray<f32>, 2>::from_data(TensorData::new(vec![1.0f32, 0.0], [1, 2]), &device);
        let loss: f64 = categorical_cross_entropy(logits, targets).into_scalar().elem();
        assert!(loss < 1e-3);
    }

    #[test]
    fn test_emits_one_progress_per_epoch() {
        let mut epochs = Vec::new();
        let head = trainer(5)
            .train(separable_dataset(6), vec!["a".into(), "b".into()], |p| epochs.push(p.clone()))
            .unwrap();

        assert_eq!(epochs.len(), 5);
        assert_eq!(epochs.iter().map(|p| p.epoch).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert!(epochs.iter().all(|p| p.total_epochs == 5));
        assert!(epochs.iter().all(|p| p.val_loss.is_none()));
        assert_eq!(head.class_names(), &["a".to_string(), "b".to_string()]);
        assert_eq!(head.feature_dim(), 4);
    }

    #[test]
    fn test_learns_separable_data() {
        let mut epochs = Vec::new();
        let head = trainer(60)
            .train(separable_dataset(5), vec!["a".into(), "b".into()], |p| epochs.push(p.clone()))
            .unwrap();

        let first = epochs.first().unwrap().loss;
        let last = epochs.last().unwrap().loss;
        assert!(last < first, "loss {} -> {}", first, last);

        let p = head.probabilities(&[1.0, 0.0, 0.2, 0.0]).unwrap();
        assert!(p[0] > p[1]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        let p = head.probabilities(&[0.0, 1.0, 0.0, 0.2]).unwrap();
        assert!(p[1] > p[0]);
    }

    #[test]
    fn test_validation_metrics_when_enough_data() {
        let mut last = None;
        trainer(2)
            .train(separable_dataset(10), vec!["a".into(), "b".into()], |p| last = Some(p.clone()))
            .unwrap();

        let last = last.unwrap();
        assert!(last.val_loss.is_some());
        let val_accuracy = last.val_accuracy.unwrap();
        assert!((0.0..=1.0).contains(&val_accuracy));
    }

    #[test]
    fn test_iterator_is_finite() {
        let mut run = trainer(3)
            .start(separable_dataset(4), vec!["a".into(), "b".into()])
            .unwrap();
        assert!(run.next().is_some());
        assert_eq!(run.epochs_completed(), 1);
        assert_eq!(run.by_ref().count(), 2);
        assert!(run.next().is_none());
        assert_eq!(run.last_progress().map(|p| p.epoch), Some(3));
    }

    #[test]
    fn test_finish_runs_remaining_epochs() {
        let run = trainer(4)
            .start(separable_dataset(4), vec!["a".into(), "b".into()])
            .unwrap();
        let head = run.finish().unwrap();
        assert_eq!(head.num_classes(), 2);
    }

    #[test]
    fn test_requires_two_classes() {
        let dataset = TrainingDataset::new(vec![0.0; 4], vec![0], 4, 1).unwrap();
        let result = trainer(1).start(dataset, vec!["only".into()]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_class_without_rows_is_rejected() {
        let dataset = TrainingDataset::new(vec![0.0; 12], vec![0, 0, 0], 4, 2).unwrap();
        let result = trainer(1).start(dataset, vec!["a".into(), "b".into()]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_hyperparameters_follow_image_counts_not_rows() {
        // 10枚を3倍に拡張した30行
        let dataset = separable_dataset(15).with_image_counts(vec![5, 5]).unwrap();
        let run = trainer(1).start(dataset, vec!["a".into(), "b".into()]).unwrap();

        assert_eq!(run.dataset_rows(), 30);
        assert_eq!(*run.hyperparameters(), select_hyperparameters(10, 5));
        assert_eq!(run.hyperparameters().learning_rate, 0.001);
        assert_eq!(run.hyperparameters().validation_split, 0.0);
    }

    #[test]
    fn test_network_config_json_round_trip() {
        let config = ClassifierNetworkConfig::new(8, 3, 128, 64).with_dropout1(0.3);
        let json = serde_json::to_string(&config).unwrap();
        let restored: ClassifierNetworkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.hidden1, 128);
        assert_eq!(restored.dropout1, 0.3);
        assert_eq!(restored.dropout2, 0.25);
    }

    #[test]
    fn test_class_name_count_must_match() {
        let result = trainer(1).start(separable_dataset(2), vec!["a".into(), "b".into(), "c".into()]);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_probabilities_reject_wrong_dimension() {
        let head = trainer(1)
            .train(separable_dataset(2), vec!["a".into(), "b".into()], |_| {})
            .unwrap();
        assert!(matches!(head.probabilities(&[1.0, 2.0]), Err(Error::Inference(_))));
    }
}
