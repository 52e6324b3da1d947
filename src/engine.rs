//! 学習エンジン
//!
//! 特徴抽出器・学習済みヘッド・スナップショット・学習中フラグを1つにまとめる。
//! プロジェクトごとに1インスタンスを作り、参照で渡して使う。

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use burn::optim::Optimizer;
use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::ml::augmentation::Augmenter;
use crate::ml::dataset::DatasetBuilder;
use crate::ml::extractor::FeatureExtractor;
use crate::ml::inference;
use crate::ml::training::{ClassifierHead, ClassifierNetwork, ClassifierTrainer, FitRun, Hyperparameters, TrainingOptions};
use crate::model::{is_stale, EngineConfig, TrainingSnapshot};
use crate::types::{LabeledImageSet, PredictionResult, RawImage, TrainingProgress};

/// 学習済みモデルの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrainingStatus {
    Untrained,
    Training,
    Trained,
    /// 学習後にデータが変わった
    Stale,
}

/// 学習成功時の概要
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub project_id: String,
    pub class_names: Vec<String>,
    /// 拡張込みの学習行数
    pub rows: usize,
    pub epochs: usize,
    pub final_progress: Option<TrainingProgress>,
    pub hyperparameters: Hyperparameters,
}

struct EngineState<B: Backend> {
    head: Option<ClassifierHead<B>>,
    snapshot: Option<TrainingSnapshot>,
}

/// 学習エンジン本体
pub struct TrainingEngine<B: AutodiffBackend> {
    extractor: FeatureExtractor<B::InnerBackend>,
    config: EngineConfig,
    device: B::Device,
    training: AtomicBool,
    state: Mutex<EngineState<B::InnerBackend>>,
}

impl<B: AutodiffBackend> TrainingEngine<B> {
    pub fn new(extractor: FeatureExtractor<B::InnerBackend>, config: EngineConfig, device: B::Device) -> Self {
        if extractor.input_size() != config.image_size {
            tracing::warn!(
                extractor_input = extractor.input_size(),
                configured = config.image_size,
                "設定の画像サイズと特徴抽出器の入力サイズが異なります。特徴抽出器の値を使用します"
            );
        }

        Self {
            extractor,
            config,
            device,
            training: AtomicBool::new(false),
            state: Mutex::new(EngineState {
                head: None,
                snapshot: None,
            }),
        }
    }

    /// 設定の `extractor_path` から特徴抽出器を読み込んで作成
    pub fn from_config(config: EngineConfig, device: B::Device) -> Result<Self> {
        let extractor = FeatureExtractor::load(Path::new(&config.extractor_path), &device)?;
        Ok(Self::new(extractor, config, device))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn extractor(&self) -> &FeatureExtractor<B::InnerBackend> {
        &self.extractor
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState<B::InnerBackend>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 学習を開始する
    ///
    /// 入力検証とデータセット構築までをここで行い、エポックは返り値の
    /// `TrainingRun` を進めたときに実行される。既存のヘッドは開始時に破棄する。
    pub fn start_training(
        &self,
        project_id: &str,
        images: &LabeledImageSet,
    ) -> Result<TrainingRun<'_, B, impl Optimizer<ClassifierNetwork<B>, B>>> {
        let guard = TrainingGuard::acquire(&self.training)?;
        images.validate_for_training()?;

        {
            let mut state = self.lock_state();
            state.head = None;
            state.snapshot = None;
        }

        tracing::info!(
            project_id,
            classes = images.num_classes(),
            total_images = images.total_images(),
            "学習を開始します"
        );

        let augmenter = match self.config.seed {
            Some(seed) => Augmenter::seeded(seed),
            None => Augmenter::new(),
        };
        let dataset = DatasetBuilder::new(&self.extractor, self.config.augmentation.clone(), augmenter).build(images)?;

        let trainer = ClassifierTrainer::<B>::new(
            self.device.clone(),
            TrainingOptions {
                num_epochs: self.config.num_epochs,
                batch_size: self.config.batch_size,
                seed: self.config.seed,
            },
        );
        let fit = trainer.start(dataset, images.class_names())?;

        Ok(TrainingRun {
            engine: self,
            fit,
            project_id: project_id.to_string(),
            class_names: images.class_names(),
            image_counts: images.class_counts(),
            guard,
        })
    }

    /// 最後まで学習し、エポックごとに `on_progress` を呼ぶ
    pub fn train<F>(&self, project_id: &str, images: &LabeledImageSet, mut on_progress: F) -> Result<TrainingSummary>
    where
        F: FnMut(&TrainingProgress),
    {
        let mut run = self.start_training(project_id, images)?;
        for progress in run.by_ref() {
            on_progress(&progress?);
        }
        run.finish()
    }

    /// 画像1枚を分類
    pub fn predict(&self, image: &RawImage) -> Result<PredictionResult> {
        let state = self.lock_state();
        inference::predict(state.head.as_ref(), &self.extractor, image)
    }

    /// 学習済みヘッドとスナップショットを破棄
    pub fn reset(&self) -> Result<()> {
        if self.is_training() {
            return Err(Error::AlreadyTraining);
        }
        let mut state = self.lock_state();
        state.head = None;
        state.snapshot = None;
        tracing::info!("学習済みモデルを破棄しました");
        Ok(())
    }

    pub fn snapshot(&self) -> Option<TrainingSnapshot> {
        self.lock_state().snapshot.clone()
    }

    pub fn is_trained(&self) -> bool {
        self.lock_state().head.is_some()
    }

    /// 指定プロジェクト用に学習済みか（別プロジェクトのヘッドは未学習扱い）
    pub fn is_trained_for(&self, project_id: &str) -> bool {
        let state = self.lock_state();
        state.head.is_some()
            && state
                .snapshot
                .as_ref()
                .map(|s| s.project_id == project_id)
                .unwrap_or(false)
    }

    /// 現在のデータに対して学習済みヘッドが古いか（未学習なら false）
    pub fn is_stale(&self, images: &LabeledImageSet) -> bool {
        let stale = is_stale(self.lock_state().snapshot.as_ref(), images);
        tracing::debug!(stale, "再学習の要否を判定しました");
        stale
    }

    pub fn status(&self, project_id: &str, images: &LabeledImageSet) -> TrainingStatus {
        if self.is_training() {
            TrainingStatus::Training
        } else if !self.is_trained_for(project_id) {
            TrainingStatus::Untrained
        } else if self.is_stale(images) {
            TrainingStatus::Stale
        } else {
            TrainingStatus::Trained
        }
    }

    fn install(&self, head: ClassifierHead<B::InnerBackend>, snapshot: TrainingSnapshot) {
        let mut state = self.lock_state();
        state.head = Some(head);
        state.snapshot = Some(snapshot);
    }
}

/// 学習中フラグを保持し、破棄時に解除する
struct TrainingGuard<'a> {
    flag: &'a AtomicBool,
    completed: bool,
}

impl<'a> TrainingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| Error::AlreadyTraining)?;
        Ok(Self { flag, completed: false })
    }
}

impl Drop for TrainingGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            tracing::info!("学習は完了せずに終了しました");
        }
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// 実行中の学習
///
/// `Iterator` として1エポックずつ進む。ヘッドとスナップショットを登録するのは
/// `finish` だけで、イテレータを最後まで消費しても `finish` を呼ばなければ
/// 学習結果は捨てられ、エンジンは未学習のまま。
pub struct TrainingRun<'a, B: AutodiffBackend, O> {
    engine: &'a TrainingEngine<B>,
    fit: FitRun<B, O>,
    project_id: String,
    class_names: Vec<String>,
    image_counts: Vec<usize>,
    guard: TrainingGuard<'a>,
}

impl<B: AutodiffBackend, O: Optimizer<ClassifierNetwork<B>, B>> TrainingRun<'_, B, O> {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn total_epochs(&self) -> usize {
        self.fit.total_epochs()
    }

    pub fn epochs_completed(&self) -> usize {
        self.fit.epochs_completed()
    }

    pub fn hyperparameters(&self) -> &Hyperparameters {
        self.fit.hyperparameters()
    }

    /// 残りのエポックを実行し、結果をエンジンに登録する
    pub fn finish(self) -> Result<TrainingSummary> {
        let TrainingRun {
            engine,
            mut fit,
            project_id,
            class_names,
            image_counts,
            mut guard,
        } = self;

        for progress in fit.by_ref() {
            progress?;
        }
        let final_progress = fit.last_progress().cloned();
        let rows = fit.dataset_rows();
        let epochs = fit.epochs_completed();
        let hyperparameters = *fit.hyperparameters();

        let head = fit.finish()?;
        let snapshot = TrainingSnapshot::capture(project_id.clone(), class_names.clone(), image_counts)?;
        engine.install(head, snapshot);
        guard.completed = true;

        tracing::info!(
            project_id = %project_id,
            rows,
            epochs,
            loss = final_progress.as_ref().map(|p| p.loss),
            accuracy = final_progress.as_ref().map(|p| p.accuracy),
            "学習が完了しました"
        );

        Ok(TrainingSummary {
            project_id,
            class_names,
            rows,
            epochs,
            final_progress,
            hyperparameters,
        })
    }
}

impl<B: AutodiffBackend, O: Optimizer<ClassifierNetwork<B>, B>> Iterator for TrainingRun<'_, B, O> {
    type Item = Result<TrainingProgress>;

    fn next(&mut self) -> Option<Self::Item> {
        self.fit.next()
    }
}
