//! 特徴抽出器バンドルの永続化
//!
//! Tar.gz形式で抽出器の重みとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（入力サイズ、ネットワーク構成など）
//! - model.bin       - ネットワークの重み（バイナリ）

use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::error::{Error, Result};
use crate::model::model_metadata::ExtractorMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const WEIGHTS_ENTRY: &str = "model.bin";

/// メタデータと共に抽出器をTar.gz形式で保存
pub fn save_extractor_bundle(
    output_path: &Path,
    metadata: &ExtractorMetadata,
    model_binary: &[u8],
) -> Result<()> {
    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tar_gz_file = File::create(output_path)?;

    // Gzip圧縮を設定
    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, WEIGHTS_ENTRY, model_binary)?;

    // tarアーカイブを完成させ、gzipストリームを閉じる
    let encoder = tar_builder.into_inner()?;
    encoder.finish()?;

    tracing::info!(path = %output_path.display(), "特徴抽出器バンドルを保存しました");
    Ok(())
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes)?;
    Ok(())
}

/// Tar.gzファイルからメタデータと重みを読み込む
pub fn load_extractor_bundle(tar_gz_path: &Path) -> Result<(ExtractorMetadata, Vec<u8>)> {
    let tar_gz_file = File::open(tar_gz_path).map_err(|e| {
        Error::ModelLoad(format!("バンドルを開けません: {:?}: {}", tar_gz_path, e))
    })?;
    read_extractor_bundle(tar_gz_file)
}

/// 任意のストリームからメタデータと重みを読み込む
pub fn read_extractor_bundle<R: Read>(reader: R) -> Result<(ExtractorMetadata, Vec<u8>)> {
    let decoder = GzDecoder::new(reader);
    let mut archive = Archive::new(decoder);

    let mut metadata_opt: Option<ExtractorMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    let entries = archive.entries().map_err(bundle_error)?;
    for entry in entries {
        let mut entry = entry.map_err(bundle_error)?;
        let path = entry.path().map_err(bundle_error)?.to_string_lossy().to_string();

        match path.as_str() {
            METADATA_ENTRY => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str).map_err(bundle_error)?;
                let metadata = ExtractorMetadata::from_json_string(&json_str)
                    .map_err(|e| Error::ModelLoad(format!("metadata.jsonが不正です: {}", e)))?;
                metadata_opt = Some(metadata);
            }
            WEIGHTS_ENTRY => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer).map_err(bundle_error)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(Error::ModelLoad(format!("{} がバンドル内にありません", METADATA_ENTRY))),
        (_, None) => Err(Error::ModelLoad(format!("{} がバンドル内にありません", WEIGHTS_ENTRY))),
    }
}

fn bundle_error(err: std::io::Error) -> Error {
    Error::ModelLoad(format!("バンドルの読み込みエラー: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::EmbeddingNetworkConfig;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("local_classifier_{}_{}.tar.gz", name, std::process::id()))
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("storage");
        let metadata = ExtractorMetadata::new("backbone", 64, EmbeddingNetworkConfig::new());
        save_extractor_bundle(&path, &metadata, &[1, 2, 3, 4]).unwrap();

        let (loaded, binary) = load_extractor_bundle(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.name, "backbone");
        assert_eq!(loaded.input_size, 64);
        assert_eq!(binary, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_missing_weights_entry() {
        let path = temp_path("no_weights");
        {
            let file = File::create(&path).unwrap();
            let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
            let json = ExtractorMetadata::new("x", 8, EmbeddingNetworkConfig::new())
                .to_json_string()
                .unwrap();
            append_entry(&mut builder, METADATA_ENTRY, json.as_bytes()).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let result = load_extractor_bundle(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(Error::ModelLoad(_))));
    }

    #[test]
    fn test_not_a_bundle() {
        let result = read_extractor_bundle(std::io::Cursor::new(b"plain text".to_vec()));
        assert!(matches!(result, Err(Error::ModelLoad(_))));
    }
}
