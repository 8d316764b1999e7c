//! Helper-стратегии: что подать на следующий шаг и как выбрать токен.
//!
//! - [`TrainingHelper`]: teacher forcing, входы берутся из готовой последовательности.
//! - [`GreedyEmbeddingHelper`]: argmax + эмбеддинг выбранного токена.
//! - [`SampleEmbeddingHelper`]: сэмплирование из softmax(logits / T).

use candle_core::{bail, DType, Device, Result, Tensor, D};
use rand::distributions::Distribution;
use rand::SeedableRng;

use seq2seq_core::{all_finished, finished_from_bools, DecoderOutput, Helper};

/// Argmax по последней оси: logits [B, V] → ids [B] (`U32`).
pub fn argmax_ids(logits: &Tensor) -> Result<Tensor> {
    logits.argmax(D::Minus1)
}

// ---------------------------------------------------------------------------
// Teacher forcing
// ---------------------------------------------------------------------------

/// Teacher forcing: на шаге t подаётся `inputs[:, t]`.
///
/// Последовательность b заканчивается, когда `t + 1 >= sequence_length[b]`.
pub struct TrainingHelper {
    /// Входы [B, T, D].
    inputs: Tensor,
    sequence_length: Vec<usize>,
    /// Нулевой вход [B, D] для законченных батчей.
    zero_inputs: Tensor,
}

impl TrainingHelper {
    pub fn new(inputs: Tensor, sequence_length: Vec<usize>) -> Result<Self> {
        let (batch, _time, dim) = inputs.dims3()?;
        if sequence_length.len() != batch {
            bail!(
                "TrainingHelper: sequence_length на {} элементов, батч {}",
                sequence_length.len(),
                batch
            );
        }
        let zero_inputs = Tensor::zeros((batch, dim), inputs.dtype(), inputs.device())?;
        Ok(Self {
            inputs,
            sequence_length,
            zero_inputs,
        })
    }

    pub fn sequence_length(&self) -> &[usize] {
        &self.sequence_length
    }

    fn input_at(&self, time: usize) -> Result<Tensor> {
        if time >= self.inputs.dim(1)? {
            return Ok(self.zero_inputs.clone());
        }
        self.inputs.narrow(1, time, 1)?.squeeze(1)
    }

    fn finished_at(&self, time: usize) -> Result<Tensor> {
        let flags: Vec<bool> = self.sequence_length.iter().map(|&len| time >= len).collect();
        finished_from_bools(&flags, self.inputs.device())
    }
}

impl<S> Helper<S> for TrainingHelper {
    fn batch_size(&self) -> usize {
        self.sequence_length.len()
    }

    fn initialize(&mut self) -> Result<(Tensor, Tensor)> {
        let finished = self.finished_at(0)?;
        let inputs = if all_finished(&finished)? {
            self.zero_inputs.clone()
        } else {
            self.input_at(0)?
        };
        Ok((finished, inputs))
    }

    fn sample(&mut self, _time: usize, outputs: &Tensor, _state: &S) -> Result<Tensor> {
        argmax_ids(outputs)
    }

    fn next_inputs(
        &mut self,
        time: usize,
        _outputs: &DecoderOutput,
        state: S,
        _sample_ids: &Tensor,
    ) -> Result<(Tensor, Tensor, S)> {
        let next_time = time + 1;
        let finished = self.finished_at(next_time)?;
        let next_inputs = if all_finished(&finished)? {
            self.zero_inputs.clone()
        } else {
            self.input_at(next_time)?
        };
        Ok((finished, next_inputs, state))
    }
}

// ---------------------------------------------------------------------------
// Greedy
// ---------------------------------------------------------------------------

/// Greedy-инференс: argmax, следующий вход — эмбеддинг выбранного токена.
pub struct GreedyEmbeddingHelper {
    /// Матрица эмбеддингов [V, E].
    embedding: Tensor,
    /// Эмбеддинги стартовых токенов [B, E].
    start_inputs: Tensor,
    end_token: u32,
    batch_size: usize,
}

impl GreedyEmbeddingHelper {
    pub fn new(embedding: Tensor, start_tokens: &[u32], end_token: u32) -> Result<Self> {
        let (vocab_size, _) = embedding.dims2()?;
        if let Some(&bad) = start_tokens.iter().find(|&&t| t as usize >= vocab_size) {
            bail!("Стартовый токен {bad} вне словаря (vocab_size={vocab_size})");
        }
        let ids = Tensor::new(start_tokens, embedding.device())?;
        let start_inputs = embedding.embedding(&ids)?;
        Ok(Self {
            embedding,
            start_inputs,
            end_token,
            batch_size: start_tokens.len(),
        })
    }

    pub fn end_token(&self) -> u32 {
        self.end_token
    }

    fn device(&self) -> &Device {
        self.embedding.device()
    }

    fn embed_next(&self, sample_ids: &Tensor) -> Result<(Tensor, Tensor)> {
        let ids: Vec<u32> = sample_ids.to_dtype(DType::U32)?.to_vec1()?;
        let flags: Vec<bool> = ids.iter().map(|&id| id == self.end_token).collect();
        let finished = finished_from_bools(&flags, self.device())?;
        let next_inputs = if flags.iter().all(|&f| f) {
            self.start_inputs.clone()
        } else {
            let ids = Tensor::new(ids.as_slice(), self.device())?;
            self.embedding.embedding(&ids)?
        };
        Ok((finished, next_inputs))
    }
}

impl<S> Helper<S> for GreedyEmbeddingHelper {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn initialize(&mut self) -> Result<(Tensor, Tensor)> {
        let finished = finished_from_bools(&vec![false; self.batch_size], self.device())?;
        Ok((finished, self.start_inputs.clone()))
    }

    fn sample(&mut self, _time: usize, outputs: &Tensor, _state: &S) -> Result<Tensor> {
        argmax_ids(outputs)
    }

    fn next_inputs(
        &mut self,
        _time: usize,
        _outputs: &DecoderOutput,
        state: S,
        sample_ids: &Tensor,
    ) -> Result<(Tensor, Tensor, S)> {
        let (finished, next_inputs) = self.embed_next(sample_ids)?;
        Ok((finished, next_inputs, state))
    }
}

// ---------------------------------------------------------------------------
// Sampling
// ---------------------------------------------------------------------------

/// Как [`GreedyEmbeddingHelper`], но токен сэмплируется из softmax(logits / T).
///
/// При `temperature <= 0` работает как greedy.
pub struct SampleEmbeddingHelper {
    greedy: GreedyEmbeddingHelper,
    temperature: f64,
    rng: rand::rngs::StdRng,
}

impl SampleEmbeddingHelper {
    pub fn new(
        embedding: Tensor,
        start_tokens: &[u32],
        end_token: u32,
        temperature: f64,
        seed: u64,
    ) -> Result<Self> {
        Ok(Self {
            greedy: GreedyEmbeddingHelper::new(embedding, start_tokens, end_token)?,
            temperature,
            rng: rand::rngs::StdRng::seed_from_u64(seed),
        })
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    fn sample_with_temperature(&mut self, logits: &Tensor) -> Result<Tensor> {
        let logits = (logits.to_dtype(DType::F32)? / self.temperature)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
        let rows: Vec<Vec<f32>> = probs.to_vec2()?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            let distr =
                rand::distributions::WeightedIndex::new(row).map_err(candle_core::Error::wrap)?;
            ids.push(distr.sample(&mut self.rng) as u32);
        }
        let batch = ids.len();
        Tensor::from_vec(ids, batch, logits.device())
    }
}

impl<S> Helper<S> for SampleEmbeddingHelper {
    fn batch_size(&self) -> usize {
        self.greedy.batch_size
    }

    fn initialize(&mut self) -> Result<(Tensor, Tensor)> {
        <GreedyEmbeddingHelper as Helper<S>>::initialize(&mut self.greedy)
    }

    fn sample(&mut self, _time: usize, outputs: &Tensor, _state: &S) -> Result<Tensor> {
        if self.temperature <= 0.0 {
            return argmax_ids(outputs);
        }
        self.sample_with_temperature(outputs)
    }

    fn next_inputs(
        &mut self,
        _time: usize,
        _outputs: &DecoderOutput,
        state: S,
        sample_ids: &Tensor,
    ) -> Result<(Tensor, Tensor, S)> {
        let (finished, next_inputs) = self.greedy.embed_next(sample_ids)?;
        Ok((finished, next_inputs, state))
    }
}

#[cfg(test)]
mod tests {
    use seq2seq_core::finished_to_bools;

    use super::*;

    /// Эмбеддинг = one-hot: строка i — единичный вектор e_i.
    fn one_hot_embedding(n: usize, device: &Device) -> Tensor {
        let mut data = vec![0f32; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0;
        }
        Tensor::from_vec(data, (n, n), device).unwrap()
    }

    fn dummy_output(logits: &Tensor, ids: &Tensor) -> DecoderOutput {
        DecoderOutput {
            logits: logits.clone(),
            predicted_ids: ids.clone(),
            cell_output: logits.clone(),
        }
    }

    #[test]
    fn test_training_helper_feeds_ground_truth() {
        let device = Device::Cpu;
        // [B=2, T=3, D=1]: значения = 10*b + t
        let inputs = Tensor::new(&[[[0f32], [1.0], [2.0]], [[10.0], [11.0], [12.0]]], &device)
            .unwrap();
        let mut helper = TrainingHelper::new(inputs, vec![3, 1]).unwrap();

        let (finished, first) = Helper::<()>::initialize(&mut helper).unwrap();
        assert_eq!(finished_to_bools(&finished).unwrap(), vec![false, false]);
        assert_eq!(first.to_vec2::<f32>().unwrap(), vec![vec![0.0], vec![10.0]]);

        let logits = Tensor::new(&[[0f32, 1.0], [1.0, 0.0]], &device).unwrap();
        let ids = Helper::<()>::sample(&mut helper, 0, &logits, &()).unwrap();
        assert_eq!(ids.to_vec1::<u32>().unwrap(), vec![1, 0]);

        let out = dummy_output(&logits, &ids);
        let (finished, next, _) = helper.next_inputs(0, &out, (), &ids).unwrap();
        assert_eq!(finished_to_bools(&finished).unwrap(), vec![false, true]);
        assert_eq!(next.to_vec2::<f32>().unwrap(), vec![vec![1.0], vec![11.0]]);

        let (finished, next, _) = helper.next_inputs(2, &out, (), &ids).unwrap();
        assert_eq!(finished_to_bools(&finished).unwrap(), vec![true, true]);
        assert_eq!(next.to_vec2::<f32>().unwrap(), vec![vec![0.0], vec![0.0]]);
    }

    #[test]
    fn test_training_helper_rejects_bad_lengths() {
        let device = Device::Cpu;
        let inputs = Tensor::zeros((2, 3, 4), DType::F32, &device).unwrap();
        assert!(TrainingHelper::new(inputs, vec![3]).is_err());
    }

    #[test]
    fn test_greedy_helper_end_token() {
        let device = Device::Cpu;
        let embedding = one_hot_embedding(4, &device);
        let mut helper = GreedyEmbeddingHelper::new(embedding, &[1, 1], 3).unwrap();

        let (finished, first) = Helper::<()>::initialize(&mut helper).unwrap();
        assert_eq!(finished_to_bools(&finished).unwrap(), vec![false, false]);
        assert_eq!(
            first.to_vec2::<f32>().unwrap(),
            vec![vec![0.0, 1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]]
        );

        let logits = Tensor::new(&[[0f32, 0.0, 5.0, 1.0], [0.0, 0.0, 1.0, 5.0]], &device).unwrap();
        let ids = Helper::<()>::sample(&mut helper, 0, &logits, &()).unwrap();
        assert_eq!(ids.to_vec1::<u32>().unwrap(), vec![2, 3]);

        let out = dummy_output(&logits, &ids);
        let (finished, next, _) = helper.next_inputs(0, &out, (), &ids).unwrap();
        assert_eq!(finished_to_bools(&finished).unwrap(), vec![false, true]);
        assert_eq!(
            next.to_vec2::<f32>().unwrap(),
            vec![vec![0.0, 0.0, 1.0, 0.0], vec![0.0, 0.0, 0.0, 1.0]]
        );
    }

    #[test]
    fn test_training_helper_zero_length_finished_at_start() {
        let device = Device::Cpu;
        let inputs = Tensor::ones((2, 3, 2), DType::F32, &device).unwrap();
        let mut helper = TrainingHelper::new(inputs, vec![0, 2]).unwrap();

        let (finished, first) = Helper::<()>::initialize(&mut helper).unwrap();
        assert_eq!(finished_to_bools(&finished).unwrap(), vec![true, false]);
        assert_eq!(first.dims(), &[2, 2]);
    }

    #[test]
    fn test_greedy_helper_all_finished_returns_start_inputs() {
        let device = Device::Cpu;
        let embedding = one_hot_embedding(4, &device);
        let mut helper = GreedyEmbeddingHelper::new(embedding, &[1, 2], 3).unwrap();
        let (_, start) = Helper::<()>::initialize(&mut helper).unwrap();

        let logits = Tensor::new(&[[0f32, 0.0, 0.0, 5.0], [0.0, 0.0, 1.0, 5.0]], &device).unwrap();
        let ids = Helper::<()>::sample(&mut helper, 0, &logits, &()).unwrap();
        assert_eq!(ids.to_vec1::<u32>().unwrap(), vec![3, 3]);

        let out = dummy_output(&logits, &ids);
        let (finished, next, _) = helper.next_inputs(0, &out, (), &ids).unwrap();
        assert_eq!(finished_to_bools(&finished).unwrap(), vec![true, true]);
        assert_eq!(
            next.to_vec2::<f32>().unwrap(),
            start.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_greedy_helper_rejects_unknown_start_token() {
        let device = Device::Cpu;
        let embedding = one_hot_embedding(4, &device);
        assert!(GreedyEmbeddingHelper::new(embedding, &[4], 3).is_err());
    }

    #[test]
    fn test_sample_helper_is_seeded() {
        let device = Device::Cpu;
        let embedding = one_hot_embedding(8, &device);
        let logits = Tensor::randn(0f32, 1.0, (4, 8), &device).unwrap();

        let run = |seed: u64| {
            let mut helper =
                SampleEmbeddingHelper::new(embedding.clone(), &[0, 0, 0, 0], 7, 1.0, seed).unwrap();
            (0..5)
                .map(|t| {
                    Helper::<()>::sample(&mut helper, t, &logits, &())
                        .unwrap()
                        .to_vec1::<u32>()
                        .unwrap()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn test_sample_helper_peaked_distribution() {
        let device = Device::Cpu;
        let embedding = one_hot_embedding(3, &device);
        let mut helper = SampleEmbeddingHelper::new(embedding, &[0], 2, 1.0, 7).unwrap();
        // Почти вся масса на токене 1.
        let logits = Tensor::new(&[[0f32, 100.0, 0.0]], &device).unwrap();
        for t in 0..10 {
            let ids = Helper::<()>::sample(&mut helper, t, &logits, &()).unwrap();
            assert_eq!(ids.to_vec1::<u32>().unwrap(), vec![1]);
        }
    }

    #[test]
    fn test_sample_helper_zero_temperature_is_greedy() {
        let device = Device::Cpu;
        let embedding = one_hot_embedding(3, &device);
        let mut helper = SampleEmbeddingHelper::new(embedding, &[0, 0], 2, 0.0, 1).unwrap();
        let logits = Tensor::new(&[[0.2f32, 0.1, 0.0], [0.0, 0.1, 0.3]], &device).unwrap();
        let ids = Helper::<()>::sample(&mut helper, 0, &logits, &()).unwrap();
        assert_eq!(ids.to_vec1::<u32>().unwrap(), vec![0, 2]);
    }
}
