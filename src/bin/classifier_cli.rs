//! 学習エンジンのコマンドラインツール
//!
//! 使い方:
//!   classifier_cli init-extractor <out.tar.gz>
//!   classifier_cli train <data_dir> [image ...]
//!   classifier_cli status <data_dir>

#![recursion_limit = "256"]

use anyhow::{bail, Context, Result};
use burn::tensor::backend::AutodiffBackend;
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use local_classifier::ml::{export_network_weights, EmbeddingNetworkConfig};
use local_classifier::model::{save_extractor_bundle, ExtractorMetadata};
use local_classifier::{DeviceType, EngineConfig, LabeledImageSet, RawImage, TrainingEngine, TrainingSnapshot};

const SNAPSHOT_FILE: &str = "training_snapshot.json";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("init-extractor") => {
            let out = args.get(1).context("出力先のパスを指定してください")?;
            init_extractor(Path::new(out))
        }
        Some("train") => {
            let data_dir = args.get(1).context("データディレクトリを指定してください")?;
            let images: Vec<PathBuf> = args[2..].iter().map(PathBuf::from).collect();
            train(Path::new(data_dir), &images)
        }
        Some("status") => {
            let data_dir = args.get(1).context("データディレクトリを指定してください")?;
            status(Path::new(data_dir))
        }
        _ => {
            eprintln!("使い方:");
            eprintln!("  classifier_cli init-extractor <out.tar.gz>");
            eprintln!("  classifier_cli train <data_dir> [image ...]");
            eprintln!("  classifier_cli status <data_dir>");
            bail!("不明なコマンドです");
        }
    }
}

/// 初期化したままのバックボーンをバンドルとして書き出す（重みのない環境での動作確認用）
fn init_extractor(out: &Path) -> Result<()> {
    let config = EngineConfig::load_or_default();
    let device = NdArrayDevice::Cpu;
    let network_config = EmbeddingNetworkConfig::new();
    let network = network_config.init::<NdArray<f32>>(&device);
    let weights = export_network_weights(&network)?;

    let input_size = u32::try_from(config.image_size).context("画像サイズが大きすぎます")?;
    let metadata = ExtractorMetadata::new("random-conv-backbone", input_size, network_config);

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("ディレクトリを作成できません: {}", parent.display()))?;
    }
    save_extractor_bundle(out, &metadata, &weights)?;

    println!("特徴抽出器を書き出しました: {}", out.display());
    Ok(())
}

fn train(data_dir: &Path, image_paths: &[PathBuf]) -> Result<()> {
    let config = EngineConfig::load_or_default();
    config.log_summary();

    match config.device_type {
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => {
            let device = burn_wgpu::WgpuDevice::default();
            train_with::<Autodiff<burn_wgpu::Wgpu>>(config, device, data_dir, image_paths)
        }
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => {
            tracing::warn!("wgpu機能が無効なためCPUで実行します");
            train_with::<Autodiff<NdArray<f32>>>(config, NdArrayDevice::Cpu, data_dir, image_paths)
        }
        DeviceType::Cpu => train_with::<Autodiff<NdArray<f32>>>(config, NdArrayDevice::Cpu, data_dir, image_paths),
    }
}

fn train_with<B: AutodiffBackend>(
    config: EngineConfig,
    device: B::Device,
    data_dir: &Path,
    image_paths: &[PathBuf],
) -> Result<()> {
    let images = LabeledImageSet::from_directory(data_dir)
        .with_context(|| format!("学習データを読み込めません: {}", data_dir.display()))?;
    let extractor_path = config.extractor_path.clone();
    let engine = TrainingEngine::<B>::from_config(config, device)
        .with_context(|| format!("特徴抽出器を読み込めません: {}", extractor_path))?;

    let project_id = data_dir.display().to_string();
    let summary = engine.train(&project_id, &images, |p| {
        match (p.val_loss, p.val_accuracy) {
            (Some(val_loss), Some(val_accuracy)) => println!(
                "Epoch {}/{}: loss={:.4} acc={:.2}% val_loss={:.4} val_acc={:.2}%",
                p.epoch,
                p.total_epochs,
                p.loss,
                p.accuracy * 100.0,
                val_loss,
                val_accuracy * 100.0
            ),
            _ => println!(
                "Epoch {}/{}: loss={:.4} acc={:.2}%",
                p.epoch,
                p.total_epochs,
                p.loss,
                p.accuracy * 100.0
            ),
        }
    })?;

    println!(
        "学習完了: {}クラス / {}行 / {}エポック",
        summary.class_names.len(),
        summary.rows,
        summary.epochs
    );

    if let Some(snapshot) = engine.snapshot() {
        let path = data_dir.join(SNAPSHOT_FILE);
        snapshot.save(&path)?;
        println!("スナップショットを保存しました: {}", path.display());
    }

    for path in image_paths {
        let image = RawImage::from_path(path).with_context(|| format!("画像を読み込めません: {}", path.display()))?;
        match engine.predict(&image) {
            Ok(result) => println!(
                "{}: {} ({:.1}%)",
                path.display(),
                result.class_name,
                result.probability * 100.0
            ),
            Err(e) => eprintln!("{}: 推論に失敗しました: {}", path.display(), e),
        }
    }

    Ok(())
}

fn status(data_dir: &Path) -> Result<()> {
    let images = LabeledImageSet::from_directory(data_dir)
        .with_context(|| format!("学習データを読み込めません: {}", data_dir.display()))?;

    let path = data_dir.join(SNAPSHOT_FILE);
    if !path.exists() {
        println!("未学習です（{} がありません）", path.display());
        return Ok(());
    }

    let snapshot = TrainingSnapshot::load(&path)?;
    println!("最終学習: {}", snapshot.trained_at);
    for (name, count) in snapshot.class_names.iter().zip(&snapshot.image_counts) {
        println!("  {}: {}枚", name, count);
    }

    if snapshot.is_stale(&images) {
        println!("データが変更されています。再学習が必要です");
    } else {
        println!("学習済みモデルは最新です");
    }
    Ok(())
}
