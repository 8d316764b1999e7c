//! Конфигурационные структуры для RNN-декодеров.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Seq2SeqError, Seq2SeqResult};

/// Конфигурация декодера (config.json в директории модели).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Имя модели (например, "basic-lstm-small").
    pub model_name: String,

    /// Размер выходного словаря (число юнитов в выходной проекции).
    pub vocab_size: usize,

    /// Размерность эмбеддинга входных токенов.
    pub embedding_dim: usize,

    /// Конфигурация рекуррентной ячейки.
    pub cell: CellConfig,

    /// Максимальное количество шагов декодирования.
    pub max_decode_length: usize,

    /// Токен начала последовательности.
    pub start_token: u32,

    /// Токен конца последовательности.
    pub end_token: u32,

    /// Параметры выбора токенов по умолчанию.
    #[serde(default)]
    pub sampling: SamplingConfig,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self::basic_lstm_small()
    }
}

impl DecoderConfig {
    /// Небольшой LSTM-декодер: 2 слоя по 128 юнитов, словарь 1000.
    pub fn basic_lstm_small() -> Self {
        Self {
            model_name: "basic-lstm-small".to_string(),
            vocab_size: 1000,
            embedding_dim: 64,
            cell: CellConfig {
                cell_type: CellType::Lstm,
                num_units: 128,
                num_layers: 2,
            },
            max_decode_length: 100,
            start_token: 1,
            end_token: 2,
            sampling: SamplingConfig::default(),
        }
    }

    /// Однослойный GRU-декодер.
    pub fn basic_gru_small() -> Self {
        Self {
            model_name: "basic-gru-small".to_string(),
            cell: CellConfig {
                cell_type: CellType::Gru,
                num_units: 128,
                num_layers: 1,
            },
            ..Self::basic_lstm_small()
        }
    }

    /// Загрузить конфигурацию из JSON-файла.
    pub fn from_json_file(path: impl AsRef<Path>) -> Seq2SeqResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data).map_err(|e| {
            Seq2SeqError::Config(format!("Ошибка парсинга {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Сохранить конфигурацию в JSON-файл.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Seq2SeqResult<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Проверить согласованность размеров и специальных токенов.
    pub fn validate(&self) -> Seq2SeqResult<()> {
        if self.vocab_size == 0 {
            return Err(Seq2SeqError::Config("vocab_size должен быть > 0".into()));
        }
        if self.embedding_dim == 0 {
            return Err(Seq2SeqError::Config("embedding_dim должен быть > 0".into()));
        }
        if self.cell.num_units == 0 || self.cell.num_layers == 0 {
            return Err(Seq2SeqError::Config(format!(
                "Некорректная ячейка: num_units={}, num_layers={}",
                self.cell.num_units, self.cell.num_layers
            )));
        }
        for (name, token) in [("start_token", self.start_token), ("end_token", self.end_token)] {
            if token as usize >= self.vocab_size {
                return Err(Seq2SeqError::Config(format!(
                    "{name}={token} вне словаря (vocab_size={})",
                    self.vocab_size
                )));
            }
        }
        if self.sampling.temperature < 0.0 {
            return Err(Seq2SeqError::Config(format!(
                "temperature должна быть >= 0, получено {}",
                self.sampling.temperature
            )));
        }
        Ok(())
    }
}

/// Тип рекуррентной ячейки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Lstm,
    Gru,
}

impl std::fmt::Display for CellType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellType::Lstm => write!(f, "lstm"),
            CellType::Gru => write!(f, "gru"),
        }
    }
}

/// Конфигурация рекуррентной ячейки.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellConfig {
    /// Тип ячейки: "lstm" или "gru".
    pub cell_type: CellType,

    /// Размерность скрытого состояния каждого слоя.
    pub num_units: usize,

    /// Количество слоёв.
    pub num_layers: usize,
}

/// Стратегия выбора токена.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingStrategy {
    /// Argmax по логитам.
    #[default]
    Greedy,
    /// Сэмплирование из softmax(logits / temperature).
    Sample,
}

/// Параметры выбора токенов.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub strategy: SamplingStrategy,

    /// Температура сэмплирования (0.0 = greedy).
    pub temperature: f64,

    /// Seed генератора случайных чисел.
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            strategy: SamplingStrategy::Greedy,
            temperature: 1.0,
            seed: 299_792_458,
        }
    }
}
