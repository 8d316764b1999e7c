//! Трейты для компонентов декодера.
//!
//! - [`RnnCell`]: рекуррентная ячейка `(inputs, state) -> (output, new_state)`.
//! - [`Helper`]: стратегия сэмплирования и подачи входов.
//! - [`Decoder`]: один шаг декодирования поверх ячейки и helper'а.
//!
//! Ошибки тензорных операций — `candle_core::Error`, они пробрасываются как есть.

use candle_core::{DType, Device, Result, Tensor};

use crate::types::{DecoderOutput, DecoderStep, OutputDtypes, OutputShapes};

/// Рекуррентная ячейка.
pub trait RnnCell {
    /// Состояние ячейки между шагами.
    type State: Clone;

    /// Размерность выхода ячейки.
    fn output_size(&self) -> usize;

    /// Тип выхода ячейки.
    fn dtype(&self) -> DType;

    /// Нулевое начальное состояние для батча.
    fn zero_state(&self, batch_size: usize, device: &Device) -> Result<Self::State>;

    /// Один шаг: inputs [B, input_size] → (output [B, output_size], new_state).
    fn step(&self, inputs: &Tensor, state: &Self::State) -> Result<(Tensor, Self::State)>;
}

impl<C: RnnCell + ?Sized> RnnCell for &C {
    type State = C::State;

    fn output_size(&self) -> usize {
        (**self).output_size()
    }

    fn dtype(&self) -> DType {
        (**self).dtype()
    }

    fn zero_state(&self, batch_size: usize, device: &Device) -> Result<Self::State> {
        (**self).zero_state(batch_size, device)
    }

    fn step(&self, inputs: &Tensor, state: &Self::State) -> Result<(Tensor, Self::State)> {
        (**self).step(inputs, state)
    }
}

/// Стратегия сэмплирования и подачи входов (greedy, teacher forcing, sampling).
///
/// `S` — состояние ячейки. Методы принимают `&mut self`: helper может
/// владеть генератором случайных чисел.
pub trait Helper<S> {
    /// Размер батча.
    fn batch_size(&self) -> usize;

    /// Начальные флаги завершения [B] и первые входы [B, D].
    fn initialize(&mut self) -> Result<(Tensor, Tensor)>;

    /// Выбрать token ID [B] по логитам [B, V].
    fn sample(&mut self, time: usize, outputs: &Tensor, state: &S) -> Result<Tensor>;

    /// Следующие (finished, next_inputs, next_state).
    fn next_inputs(
        &mut self,
        time: usize,
        outputs: &DecoderOutput,
        state: S,
        sample_ids: &Tensor,
    ) -> Result<(Tensor, Tensor, S)>;
}

impl<S, H: Helper<S> + ?Sized> Helper<S> for Box<H> {
    fn batch_size(&self) -> usize {
        (**self).batch_size()
    }

    fn initialize(&mut self) -> Result<(Tensor, Tensor)> {
        (**self).initialize()
    }

    fn sample(&mut self, time: usize, outputs: &Tensor, state: &S) -> Result<Tensor> {
        (**self).sample(time, outputs, state)
    }

    fn next_inputs(
        &mut self,
        time: usize,
        outputs: &DecoderOutput,
        state: S,
        sample_ids: &Tensor,
    ) -> Result<(Tensor, Tensor, S)> {
        (**self).next_inputs(time, outputs, state, sample_ids)
    }
}

/// Абстрактный RNN-декодер: initialize + step.
///
/// Цикл, вызывающий `step` до завершения или `max_decode_length`,
/// живёт снаружи (см. `seq2seq_decoders::decode::dynamic_decode`).
pub trait Decoder {
    type State: Clone;

    fn batch_size(&self) -> usize;

    /// Максимальное количество шагов декодирования.
    fn max_decode_length(&self) -> usize;

    /// Формы полей выхода (без batch-оси).
    fn output_size(&self) -> OutputShapes;

    /// Типы полей выхода.
    fn output_dtype(&self) -> OutputDtypes;

    /// (finished, first_inputs, initial_state).
    fn initialize(&mut self) -> Result<(Tensor, Tensor, Self::State)>;

    /// Один шаг декодирования.
    fn step(
        &mut self,
        time: usize,
        inputs: &Tensor,
        state: Self::State,
    ) -> Result<DecoderStep<Self::State>>;
}
