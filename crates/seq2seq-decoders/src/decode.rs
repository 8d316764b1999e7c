//! Цикл динамического декодирования.
//!
//! Алгоритм:
//! 1. (finished, inputs, state) = decoder.initialize()
//! 2. Пока не все последовательности закончены и time < max_decode_length:
//!    a. step(time, inputs, state)
//!    b. Для ещё не законченных примеров sequence_length = time + 1
//!    c. finished |= step.finished; на последнем допустимом шаге закончены все
//!    d. При impute_finished выходы законченных ранее примеров обнуляются
//! 3. Выходы склеиваются по временной оси: [B, T, ...]

use candle_core::{DType, Result, Tensor, D};
use tracing::debug;

use seq2seq_core::types::empty_sequence_output;
use seq2seq_core::{finished_from_bools, finished_to_bools, Decoder, DecoderOutput};

/// Параметры цикла декодирования.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    /// Обнулять выходы примеров, которые уже закончились.
    pub impute_finished: bool,
    /// Ограничить число шагов сильнее, чем `decoder.max_decode_length()`.
    pub max_steps: Option<usize>,
}

/// Результат полного декодирования.
#[derive(Debug, Clone)]
pub struct FinalDecoderOutput<S> {
    /// logits [B, T, V], predicted_ids [B, T], cell_output [B, T, H].
    pub outputs: DecoderOutput,
    /// Состояние после последнего шага.
    pub final_state: S,
    /// Длина каждой последовательности (включая шаг, на котором она закончилась).
    pub sequence_lengths: Vec<usize>,
    /// Количество выполненных шагов T.
    pub steps: usize,
}

impl<S> FinalDecoderOutput<S> {
    /// Предсказанные токены каждой последовательности, обрезанные по её длине.
    pub fn predicted_sequences(&self) -> Result<Vec<Vec<u32>>> {
        let ids: Vec<Vec<u32>> = self.outputs.predicted_ids.to_dtype(DType::U32)?.to_vec2()?;
        Ok(ids
            .into_iter()
            .zip(&self.sequence_lengths)
            .map(|(mut row, &len)| {
                row.truncate(len);
                row
            })
            .collect())
    }
}

/// Прогнать декодер до завершения всех последовательностей или лимита шагов.
pub fn dynamic_decode<Dec: Decoder>(
    decoder: &mut Dec,
    options: DecodeOptions,
) -> Result<FinalDecoderOutput<Dec::State>> {
    let max_steps = options
        .max_steps
        .map_or(decoder.max_decode_length(), |m| m.min(decoder.max_decode_length()));

    let (finished, mut inputs, mut state) = decoder.initialize()?;
    let device = inputs.device().clone();
    let mut finished = finished_to_bools(&finished)?;
    let batch_size = finished.len();
    let mut sequence_lengths = vec![0usize; batch_size];

    let mut logits = Vec::new();
    let mut predicted_ids = Vec::new();
    let mut cell_outputs = Vec::new();

    debug!(
        "dynamic_decode: batch={}, max_steps={}, impute_finished={}",
        batch_size, max_steps, options.impute_finished
    );

    let mut time = 0;
    while time < max_steps && !finished.iter().all(|&f| f) {
        let step = decoder.step(time, &inputs, state)?;

        if seq2seq_core::debug::enabled() {
            log_top_logits(time, &step.outputs.logits)?;
        }

        let mut outputs = step.outputs;
        if options.impute_finished && finished.iter().any(|&f| f) {
            let mask = finished_from_bools(&finished, &device)?;
            outputs = zero_finished(&outputs, &mask)?;
        }

        let step_finished = finished_to_bools(&step.finished)?;
        let last_step = time + 1 >= max_steps;
        for b in 0..batch_size {
            if !finished[b] {
                sequence_lengths[b] = time + 1;
            }
            let done = step_finished.get(b).copied().unwrap_or(true);
            finished[b] = finished[b] || done || last_step;
        }

        logits.push(outputs.logits);
        predicted_ids.push(outputs.predicted_ids);
        cell_outputs.push(outputs.cell_output);

        inputs = step.next_inputs;
        state = step.next_state;
        time += 1;
    }

    let outputs = if time == 0 {
        empty_sequence_output(
            &decoder.output_size(),
            &decoder.output_dtype(),
            batch_size,
            &device,
        )?
    } else {
        DecoderOutput {
            logits: Tensor::stack(&logits, 1)?,
            predicted_ids: Tensor::stack(&predicted_ids, 1)?,
            cell_output: Tensor::stack(&cell_outputs, 1)?,
        }
    };

    debug!(
        "dynamic_decode: {} шагов, длины {:?}",
        time, sequence_lengths
    );

    Ok(FinalDecoderOutput {
        outputs,
        final_state: state,
        sequence_lengths,
        steps: time,
    })
}

/// Обнулить выходы примеров с `mask[b] == 1`.
fn zero_finished(outputs: &DecoderOutput, mask: &Tensor) -> Result<DecoderOutput> {
    let select = |t: &Tensor| -> Result<Tensor> {
        let mut m = mask.clone();
        for _ in 1..t.rank() {
            m = m.unsqueeze(D::Minus1)?;
        }
        let m = m.broadcast_as(t.shape())?.contiguous()?;
        m.where_cond(&t.zeros_like()?, t)
    };
    Ok(DecoderOutput {
        logits: select(&outputs.logits)?,
        predicted_ids: select(&outputs.predicted_ids)?,
        cell_output: select(&outputs.cell_output)?,
    })
}

/// Top-5 логитов первого примера батча.
fn log_top_logits(time: usize, logits: &Tensor) -> Result<()> {
    let row: Vec<f32> = logits
        .narrow(0, 0, 1)?
        .flatten_all()?
        .to_dtype(DType::F32)?
        .to_vec1()?;
    let mut indexed: Vec<(usize, f32)> = row.into_iter().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    let top: Vec<String> = indexed
        .iter()
        .take(5)
        .map(|(i, v)| format!("{}:{:.3}", i, v))
        .collect();
    debug!("decode step {}: top=[{}]", time, top.join(", "));
    Ok(())
}
