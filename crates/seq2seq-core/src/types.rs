//! Общие типы для шага декодирования.
//!
//! Содержит запись выхода декодера, дескрипторы её форм и типов
//! и результат одного шага `Decoder::step`.

use candle_core::{DType, Device, Result, Shape, Tensor};

// ---------------------------------------------------------------------------
// Выход декодера
// ---------------------------------------------------------------------------

/// Выход одного шага декодера.
///
/// Все три поля заполняются вместе на каждом шаге:
/// - `logits`: [B, vocab_size]
/// - `predicted_ids`: [B], `U32`
/// - `cell_output`: [B, cell_output_size]
#[derive(Debug, Clone)]
pub struct DecoderOutput {
    /// Логиты по словарю (до softmax).
    pub logits: Tensor,

    /// Выбранные helper'ом token ID.
    pub predicted_ids: Tensor,

    /// Сырой выход рекуррентной ячейки.
    pub cell_output: Tensor,
}

impl DecoderOutput {
    /// Размер батча (по первой оси логитов).
    pub fn batch_size(&self) -> Result<usize> {
        self.logits.dim(0)
    }
}

// ---------------------------------------------------------------------------
// Дескрипторы форм и типов
// ---------------------------------------------------------------------------

/// Формы полей [`DecoderOutput`] для одного примера (без batch-оси).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputShapes {
    /// `[vocab_size]`.
    pub logits: Shape,
    /// Скаляр на пример: `[]`.
    pub predicted_ids: Shape,
    /// `[cell_output_size]`.
    pub cell_output: Shape,
}

impl OutputShapes {
    pub fn new(vocab_size: usize, cell_output_size: usize) -> Self {
        Self {
            logits: Shape::from(vocab_size),
            predicted_ids: Shape::from(()),
            cell_output: Shape::from(cell_output_size),
        }
    }

    /// Формы с batch-осью впереди: `[B, ...]`.
    pub fn batched(&self, batch_size: usize) -> Self {
        Self {
            logits: prepend_dim(batch_size, &self.logits),
            predicted_ids: prepend_dim(batch_size, &self.predicted_ids),
            cell_output: prepend_dim(batch_size, &self.cell_output),
        }
    }
}

fn prepend_dim(dim: usize, shape: &Shape) -> Shape {
    let mut dims = Vec::with_capacity(shape.rank() + 1);
    dims.push(dim);
    dims.extend_from_slice(shape.dims());
    Shape::from(dims)
}

/// Типы полей [`DecoderOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputDtypes {
    pub logits: DType,
    pub predicted_ids: DType,
    pub cell_output: DType,
}

impl Default for OutputDtypes {
    fn default() -> Self {
        Self {
            logits: DType::F32,
            predicted_ids: DType::U32,
            cell_output: DType::F32,
        }
    }
}

/// Пустой выход с нулевой временной осью: [B, 0, ...].
///
/// Нужен, когда цикл декодирования не сделал ни одного шага.
pub fn empty_sequence_output(
    shapes: &OutputShapes,
    dtypes: &OutputDtypes,
    batch_size: usize,
    device: &Device,
) -> Result<DecoderOutput> {
    let with_time = |shape: &Shape| {
        let mut dims = vec![batch_size, 0];
        dims.extend_from_slice(shape.dims());
        Shape::from(dims)
    };
    Ok(DecoderOutput {
        logits: Tensor::zeros(with_time(&shapes.logits), dtypes.logits, device)?,
        predicted_ids: Tensor::zeros(
            with_time(&shapes.predicted_ids),
            dtypes.predicted_ids,
            device,
        )?,
        cell_output: Tensor::zeros(with_time(&shapes.cell_output), dtypes.cell_output, device)?,
    })
}

// ---------------------------------------------------------------------------
// Результат шага
// ---------------------------------------------------------------------------

/// Результат `Decoder::step`: (outputs, next_state, next_inputs, finished).
#[derive(Debug, Clone)]
pub struct DecoderStep<S> {
    pub outputs: DecoderOutput,
    pub next_state: S,
    pub next_inputs: Tensor,
    /// Флаги завершения [B], `U8` (1 = последовательность закончена).
    pub finished: Tensor,
}

// ---------------------------------------------------------------------------
// Флаги завершения
// ---------------------------------------------------------------------------

/// Построить тензор флагов завершения [B] из булевых значений.
pub fn finished_from_bools(flags: &[bool], device: &Device) -> Result<Tensor> {
    let data: Vec<u8> = flags.iter().map(|&f| u8::from(f)).collect();
    Tensor::from_vec(data, flags.len(), device)
}

/// Прочитать тензор флагов завершения в `Vec<bool>`.
pub fn finished_to_bools(finished: &Tensor) -> Result<Vec<bool>> {
    let data: Vec<u8> = finished.to_dtype(DType::U8)?.to_vec1()?;
    Ok(data.into_iter().map(|f| f != 0).collect())
}

/// Все ли последовательности закончены (пустой батч считается законченным).
pub fn all_finished(finished: &Tensor) -> Result<bool> {
    Ok(finished_to_bools(finished)?.into_iter().all(|f| f))
}
