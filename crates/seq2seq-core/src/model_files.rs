//! Поиск файлов модели (config.json + safetensors) на диске.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Seq2SeqError, Seq2SeqResult};

/// Имя файла конфигурации.
pub const CONFIG_FILE: &str = "config.json";

/// Имя файла весов (один файл).
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Имя индекса шардированных весов.
pub const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

#[derive(serde::Deserialize)]
struct SafetensorsIndex {
    weight_map: HashMap<String, String>,
}

/// Файлы модели, найденные в директории.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    /// config.json, если есть.
    pub config: Option<PathBuf>,
    /// Файлы весов в детерминированном порядке.
    pub weights: Vec<PathBuf>,
}

impl ModelFiles {
    /// Найти файлы модели в директории.
    ///
    /// Веса: `model.safetensors` либо шарды из `model.safetensors.index.json`.
    pub fn discover(model_dir: impl AsRef<Path>) -> Seq2SeqResult<Self> {
        let model_dir = model_dir.as_ref();
        if !model_dir.is_dir() {
            return Err(Seq2SeqError::Model(format!(
                "Директория модели не найдена: {}",
                model_dir.display()
            )));
        }

        let config = Some(model_dir.join(CONFIG_FILE)).filter(|p| p.exists());
        let weights = resolve_weights(model_dir)?;
        debug!(
            "Файлы модели в {:?}: config={:?}, весов={}",
            model_dir,
            config,
            weights.len()
        );
        Ok(Self { config, weights })
    }
}

fn resolve_weights(model_dir: &Path) -> Seq2SeqResult<Vec<PathBuf>> {
    let single = model_dir.join(WEIGHTS_FILE);
    if single.exists() {
        return Ok(vec![single]);
    }

    let index_path = model_dir.join(WEIGHTS_INDEX_FILE);
    if !index_path.exists() {
        return Err(Seq2SeqError::Model(format!(
            "В директории модели нет ни {WEIGHTS_FILE}, ни {WEIGHTS_INDEX_FILE}: {}",
            model_dir.display()
        )));
    }

    let data = std::fs::read(&index_path)?;
    let index: SafetensorsIndex = serde_json::from_slice(&data)?;
    let shards: BTreeSet<&String> = index.weight_map.values().collect();
    if shards.is_empty() {
        return Err(Seq2SeqError::Model(format!(
            "Пустой weight_map в {}",
            index_path.display()
        )));
    }

    shards
        .into_iter()
        .map(|shard| {
            let p = model_dir.join(shard);
            if p.exists() {
                Ok(p)
            } else {
                Err(Seq2SeqError::Model(format!(
                    "Шард из index.json не найден: {}",
                    p.display()
                )))
            }
        })
        .collect()
}
