//!
//! CLI для RNN-декодеров RustSeq2Seq: инициализация, просмотр и декодирование.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Instant;

use seq2seq_core::{CellType, Decoder, DecoderConfig, SamplingStrategy};
use seq2seq_decoders::{GreedyEmbeddingHelper, Seq2SeqDecoderModel};

/// Тип ячейки для `init`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum CellTypeArg {
    /// LSTM (по умолчанию)
    Lstm,
    /// GRU
    Gru,
}

impl From<CellTypeArg> for CellType {
    fn from(v: CellTypeArg) -> Self {
        match v {
            CellTypeArg::Lstm => CellType::Lstm,
            CellTypeArg::Gru => CellType::Gru,
        }
    }
}

/// Стратегия выбора токена.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum StrategyArg {
    /// Argmax
    Greedy,
    /// Сэмплирование из softmax(logits / temperature)
    Sample,
}

impl From<StrategyArg> for SamplingStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::Greedy => SamplingStrategy::Greedy,
            StrategyArg::Sample => SamplingStrategy::Sample,
        }
    }
}

#[derive(Parser)]
#[command(name = "seq2seq")]
#[command(author, version, about = "RustSeq2Seq: RNN decoders on Candle", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Создать директорию модели со случайными весами (config.json + model.safetensors)
    Init {
        /// Куда сохранить модель
        #[arg(long)]
        out: PathBuf,

        /// Тип ячейки
        #[arg(long, value_enum, default_value = "lstm")]
        cell: CellTypeArg,

        /// Размер словаря
        #[arg(long, default_value_t = 1000)]
        vocab_size: usize,

        /// Размерность эмбеддинга
        #[arg(long, default_value_t = 64)]
        embedding_dim: usize,

        /// Размерность скрытого состояния
        #[arg(long, default_value_t = 128)]
        num_units: usize,

        /// Количество слоёв
        #[arg(long, default_value_t = 2)]
        num_layers: usize,

        /// Максимальная длина декодирования
        #[arg(long, default_value_t = 100)]
        max_decode_length: usize,

        /// Seed для генерации весов
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Показать конфигурацию модели и дескрипторы выхода декодера
    Inspect {
        /// Путь к директории модели
        #[arg(long)]
        model: PathBuf,
    },

    /// Запустить декодирование от стартовых токенов
    Decode {
        /// Путь к директории модели
        #[arg(long)]
        model: PathBuf,

        /// Стартовые токены батча через запятую (по умолчанию один `start_token` из конфига)
        #[arg(long, value_delimiter = ',')]
        start_tokens: Vec<u32>,

        /// Стратегия: greedy|sample (по умолчанию — из конфига)
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Температура для sample
        #[arg(long)]
        temperature: Option<f64>,

        /// Seed для sample
        #[arg(long)]
        seed: Option<u64>,

        /// Максимальное число шагов (по умолчанию — max_decode_length из конфига)
        #[arg(long)]
        max_len: Option<usize>,

        /// Device to use (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Печатать результат в JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            out,
            cell,
            vocab_size,
            embedding_dim,
            num_units,
            num_layers,
            max_decode_length,
            seed,
        } => {
            let mut config = match CellType::from(cell) {
                CellType::Lstm => DecoderConfig::basic_lstm_small(),
                CellType::Gru => DecoderConfig::basic_gru_small(),
            };
            config.model_name =
                format!("basic-{}-{}x{}", config.cell.cell_type, num_layers, num_units);
            config.vocab_size = vocab_size;
            config.embedding_dim = embedding_dim;
            config.cell.num_units = num_units;
            config.cell.num_layers = num_layers;
            config.max_decode_length = max_decode_length;
            config
                .validate()
                .context("Некорректные параметры модели")?;

            let device = candle_core::Device::Cpu;
            let weights = Seq2SeqDecoderModel::random_weights(&config, seed, &device)?;
            Seq2SeqDecoderModel::save_weights(&config, &weights, &out)?;

            println!("✅ Модель {} сохранена в {}", config.model_name, out.display());
            println!("   Тензоров: {}, seed: {}", weights.len(), seed);
        }

        Commands::Inspect { model } => {
            run_inspect(model)?;
        }

        Commands::Decode {
            model,
            start_tokens,
            strategy,
            temperature,
            seed,
            max_len,
            device,
            json,
        } => {
            let device = create_device(&device)?;
            let start = Instant::now();
            let decoder_model = Seq2SeqDecoderModel::load(&model, &device)
                .with_context(|| format!("Не удалось загрузить модель из {}", model.display()))?;
            let load_time = start.elapsed();

            let config = decoder_model.config().clone();
            let start_tokens = if start_tokens.is_empty() {
                vec![config.start_token]
            } else {
                start_tokens
            };
            let strategy = strategy
                .map(SamplingStrategy::from)
                .unwrap_or(config.sampling.strategy);

            let start = Instant::now();
            let result = match strategy {
                SamplingStrategy::Greedy => {
                    decoder_model.decode_greedy(&start_tokens, None, max_len)?
                }
                SamplingStrategy::Sample => decoder_model.decode_sampled(
                    &start_tokens,
                    None,
                    temperature.unwrap_or(config.sampling.temperature),
                    seed.unwrap_or(config.sampling.seed),
                    max_len,
                )?,
            };
            let decode_time = start.elapsed();
            let sequences = result.predicted_sequences()?;

            if json {
                let value = serde_json::json!({
                    "model": config.model_name,
                    "strategy": format!("{:?}", strategy).to_lowercase(),
                    "steps": result.steps,
                    "sequence_lengths": result.sequence_lengths,
                    "predicted_ids": sequences,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("🔁 RustSeq2Seq - RNN decoding");
                println!("================================");
                println!("Model: {} ({})", config.model_name, model.display());
                println!("Strategy: {:?}", strategy);
                println!(
                    "Load: {:.2?}, decode: {:.2?}, steps: {}",
                    load_time, decode_time, result.steps
                );
                println!();
                for (b, seq) in sequences.iter().enumerate() {
                    let ids: Vec<String> = seq.iter().map(|id| id.to_string()).collect();
                    println!(
                        "[{b}] start={} len={}: {}",
                        start_tokens[b],
                        result.sequence_lengths[b],
                        ids.join(" ")
                    );
                }
            }
        }
    }

    Ok(())
}

fn run_inspect(model_dir: PathBuf) -> Result<()> {
    if !model_dir.is_dir() {
        anyhow::bail!("Директория модели не найдена: {}", model_dir.display());
    }

    let device = candle_core::Device::Cpu;
    let model = Seq2SeqDecoderModel::load(&model_dir, &device)?;
    let config = model.config();

    println!("📦 {}", model_dir.display());
    println!("{}", serde_json::to_string_pretty(config)?);

    let helper = GreedyEmbeddingHelper::new(
        model.embedding().clone(),
        &[config.start_token],
        config.end_token,
    )?;
    let decoder = model.decoder(helper, model.zero_state(1)?, None);
    let shapes = decoder.output_size();
    let dtypes = decoder.output_dtype();

    println!();
    println!("Decoder output (per example):");
    println!("   logits:        {:?} {:?}", shapes.logits.dims(), dtypes.logits);
    println!(
        "   predicted_ids: {:?} {:?}",
        shapes.predicted_ids.dims(),
        dtypes.predicted_ids
    );
    println!(
        "   cell_output:   {:?} {:?}",
        shapes.cell_output.dims(),
        dtypes.cell_output
    );
    println!("   max_decode_length: {}", decoder.max_decode_length());
    Ok(())
}

fn create_device(device: &str) -> Result<candle_core::Device> {
    match device {
        "metal" => {
            // candle может panic при инициализации Metal (например, если устройство недоступно).
            let prev_hook = std::panic::take_hook();
            std::panic::set_hook(Box::new(|_| {}));
            let res = std::panic::catch_unwind(|| candle_core::Device::new_metal(0));
            std::panic::set_hook(prev_hook);

            match res {
                Ok(Ok(dev)) => Ok(dev),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow::anyhow!(
                    "Инициализация Metal недоступна в этом окружении. Попробуйте --device cpu."
                )),
            }
        }
        "cuda" => Ok(candle_core::Device::new_cuda(0)?),
        "cpu" => Ok(candle_core::Device::Cpu),
        other => anyhow::bail!("Неизвестное устройство: {other} (ожидается cpu, metal, cuda)"),
    }
}
