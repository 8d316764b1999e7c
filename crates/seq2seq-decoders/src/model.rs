//! Seq2SeqDecoderModel — эмбеддинг + RNN-ячейка + выходная проекция.
//!
//! Загружает модель из config.json + model.safetensors и строит
//! [`BasicDecoder`] с нужным helper'ом (greedy, sampling, teacher forcing).
//!
//! Весовые ключи:
//! - embedding.weight: [vocab_size, embedding_dim]
//! - decoder.rnn.{lstm|gru}.{weight_ih,weight_hh,bias_ih,bias_hh}_l{i}
//! - decoder.output_projection.{weight,bias}

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use seq2seq_core::{
    CellType, DecoderConfig, Helper, ModelFiles, RnnCell, Seq2SeqError, Seq2SeqResult,
};

use crate::basic_decoder::BasicDecoder;
use crate::cell::{ConfiguredCell, ConfiguredState};
use crate::decode::{dynamic_decode, DecodeOptions, FinalDecoderOutput};
use crate::helper::{GreedyEmbeddingHelper, SampleEmbeddingHelper, TrainingHelper};
use crate::projection::OutputProjection;

/// RNN-декодер, готовый к инференсу.
pub struct Seq2SeqDecoderModel {
    embedding: Tensor, // [vocab_size, embedding_dim]
    cell: ConfiguredCell,
    projection: OutputProjection,
    config: DecoderConfig,
    device: Device,
}

impl Seq2SeqDecoderModel {
    /// Загрузить модель из директории.
    ///
    /// Ожидаемые файлы:
    /// - config.json (если нет — дефолтная конфигурация)
    /// - model.safetensors или model.safetensors.index.json + шарды
    pub fn load(model_dir: impl AsRef<Path>, device: &Device) -> Seq2SeqResult<Self> {
        let model_dir = model_dir.as_ref();
        info!("Загрузка RNN-декодера из {:?}", model_dir);

        let files = ModelFiles::discover(model_dir)?;
        let config = match &files.config {
            Some(path) => DecoderConfig::from_json_file(path)?,
            None => {
                warn!("config.json не найден, используем дефолтные значения");
                DecoderConfig::default()
            }
        };

        // Для CUDA — BF16, иначе F32 (как и везде в workspace)
        let dtype = if device.is_cuda() {
            DType::BF16
        } else {
            DType::F32
        };

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, dtype, device)? };
        let model = Self::from_var_builder(config, vb)?;

        info!(
            "Модель {} загружена: {} {}×{}, vocab={}",
            model.config.model_name,
            model.config.cell.cell_type,
            model.config.cell.num_layers,
            model.config.cell.num_units,
            model.config.vocab_size
        );
        Ok(model)
    }

    /// Собрать модель из `VarBuilder` (safetensors, in-memory тензоры).
    pub fn from_var_builder(config: DecoderConfig, vb: VarBuilder) -> Seq2SeqResult<Self> {
        config.validate()?;
        let device = vb.device().clone();

        let embedding = vb.get((config.vocab_size, config.embedding_dim), "embedding.weight")?;
        let dec_vb = vb.pp("decoder");
        let cell = ConfiguredCell::load(&config.cell, config.embedding_dim, dec_vb.pp("rnn"))?;
        let projection = OutputProjection::load(
            cell.output_size(),
            config.vocab_size,
            dec_vb.pp("output_projection"),
        )?;

        Ok(Self {
            embedding,
            cell,
            projection,
            config,
            device,
        })
    }

    /// Случайные веса для конфигурации, полный набор ключей.
    ///
    /// Значения равномерны в [-1/sqrt(fan_in), 1/sqrt(fan_in)] и полностью
    /// определяются `seed`.
    pub fn random_weights(
        config: &DecoderConfig,
        seed: u64,
        device: &Device,
    ) -> Seq2SeqResult<HashMap<String, Tensor>> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ts = HashMap::new();
        let mut put = |name: String, shape: &[usize], fan_in: usize| -> Seq2SeqResult<()> {
            let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
            let dist = Uniform::new_inclusive(-bound, bound);
            let numel = shape.iter().product::<usize>();
            let data: Vec<f32> = (0..numel).map(|_| dist.sample(&mut rng)).collect();
            ts.insert(name, Tensor::from_vec(data, shape, device)?);
            Ok(())
        };

        let units = config.cell.num_units;
        let gates = match config.cell.cell_type {
            CellType::Lstm => 4,
            CellType::Gru => 3,
        };
        put(
            "embedding.weight".into(),
            &[config.vocab_size, config.embedding_dim],
            config.embedding_dim,
        )?;
        let prefix = format!("decoder.rnn.{}", config.cell.cell_type);
        for i in 0..config.cell.num_layers {
            let input = if i == 0 { config.embedding_dim } else { units };
            put(format!("{prefix}.weight_ih_l{i}"), &[gates * units, input], units)?;
            put(format!("{prefix}.weight_hh_l{i}"), &[gates * units, units], units)?;
            put(format!("{prefix}.bias_ih_l{i}"), &[gates * units], units)?;
            put(format!("{prefix}.bias_hh_l{i}"), &[gates * units], units)?;
        }
        put(
            "decoder.output_projection.weight".into(),
            &[config.vocab_size, units],
            units,
        )?;
        put(
            "decoder.output_projection.bias".into(),
            &[config.vocab_size],
            units,
        )?;

        debug!("Сгенерировано {} тензоров весов", ts.len());
        Ok(ts)
    }

    /// Сохранить config.json + model.safetensors в директорию.
    pub fn save_weights(
        config: &DecoderConfig,
        weights: &HashMap<String, Tensor>,
        model_dir: impl AsRef<Path>,
    ) -> Seq2SeqResult<()> {
        let model_dir = model_dir.as_ref();
        std::fs::create_dir_all(model_dir)?;
        config.to_json_file(model_dir.join(seq2seq_core::model_files::CONFIG_FILE))?;
        candle_core::safetensors::save(
            weights,
            model_dir.join(seq2seq_core::model_files::WEIGHTS_FILE),
        )?;
        info!("Модель сохранена в {:?}", model_dir);
        Ok(())
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn cell(&self) -> &ConfiguredCell {
        &self.cell
    }

    pub fn embedding(&self) -> &Tensor {
        &self.embedding
    }

    pub fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    /// Нулевое начальное состояние для батча.
    pub fn zero_state(&self, batch_size: usize) -> Seq2SeqResult<ConfiguredState> {
        Ok(self.cell.zero_state(batch_size, &self.device)?)
    }

    /// Построить [`BasicDecoder`], который заимствует ячейку модели.
    pub fn decoder<H>(
        &self,
        helper: H,
        initial_state: ConfiguredState,
        max_decode_length: Option<usize>,
    ) -> BasicDecoder<&ConfiguredCell, H>
    where
        H: Helper<ConfiguredState>,
    {
        BasicDecoder::with_projection(
            &self.cell,
            helper,
            initial_state,
            self.projection.clone(),
            max_decode_length.unwrap_or(self.config.max_decode_length),
        )
    }

    fn state_or_zero(
        &self,
        initial_state: Option<ConfiguredState>,
        batch_size: usize,
    ) -> Seq2SeqResult<ConfiguredState> {
        match initial_state {
            Some(state) => Ok(state),
            None => self.zero_state(batch_size),
        }
    }

    fn check_batch(&self, start_tokens: &[u32]) -> Seq2SeqResult<()> {
        if start_tokens.is_empty() {
            return Err(Seq2SeqError::Decode("Пустой батч стартовых токенов".into()));
        }
        let vocab_size = self.config.vocab_size;
        if let Some(&bad) = start_tokens.iter().find(|&&t| t as usize >= vocab_size) {
            return Err(Seq2SeqError::Decode(format!(
                "Стартовый токен {bad} вне словаря (vocab_size={vocab_size})"
            )));
        }
        Ok(())
    }

    /// Greedy-декодирование от стартовых токенов до `end_token`.
    pub fn decode_greedy(
        &self,
        start_tokens: &[u32],
        initial_state: Option<ConfiguredState>,
        max_decode_length: Option<usize>,
    ) -> Seq2SeqResult<FinalDecoderOutput<ConfiguredState>> {
        self.check_batch(start_tokens)?;
        let helper = GreedyEmbeddingHelper::new(
            self.embedding.clone(),
            start_tokens,
            self.config.end_token,
        )?;
        let state = self.state_or_zero(initial_state, start_tokens.len())?;
        let mut decoder = self.decoder(helper, state, max_decode_length);
        Ok(dynamic_decode(&mut decoder, DecodeOptions::default())?)
    }

    /// Декодирование сэмплированием из softmax(logits / temperature).
    pub fn decode_sampled(
        &self,
        start_tokens: &[u32],
        initial_state: Option<ConfiguredState>,
        temperature: f64,
        seed: u64,
        max_decode_length: Option<usize>,
    ) -> Seq2SeqResult<FinalDecoderOutput<ConfiguredState>> {
        self.check_batch(start_tokens)?;
        let helper = SampleEmbeddingHelper::new(
            self.embedding.clone(),
            start_tokens,
            self.config.end_token,
            temperature,
            seed,
        )?;
        let state = self.state_or_zero(initial_state, start_tokens.len())?;
        let mut decoder = self.decoder(helper, state, max_decode_length);
        Ok(dynamic_decode(&mut decoder, DecodeOptions::default())?)
    }

    /// Teacher forcing: `target_ids` [B, T] (`U32`) подаются как входы.
    ///
    /// Выходы законченных примеров обнуляются.
    pub fn decode_teacher_forced(
        &self,
        target_ids: &Tensor,
        sequence_length: Vec<usize>,
        initial_state: Option<ConfiguredState>,
    ) -> Seq2SeqResult<FinalDecoderOutput<ConfiguredState>> {
        let (batch, time) = target_ids.dims2()?;
        let inputs = self
            .embedding
            .embedding(&target_ids.to_dtype(DType::U32)?.flatten_all()?)?
            .reshape((batch, time, self.config.embedding_dim))?;
        let helper = TrainingHelper::new(inputs, sequence_length)?;
        let state = self.state_or_zero(initial_state, batch)?;
        let mut decoder = self.decoder(helper, state, Some(time));
        let options = DecodeOptions {
            impute_finished: true,
            ..Default::default()
        };
        Ok(dynamic_decode(&mut decoder, options)?)
    }
}
