//! BasicDecoder: RNN-шаг → линейная проекция на словарь → helper.
//!
//! Один шаг:
//! 1. (cell_output, cell_state) = cell(inputs, state)
//! 2. logits = cell_output @ W^T + b (без активации)
//! 3. sample_ids = helper.sample(time, logits, cell_state)
//! 4. (finished, next_inputs, next_state) = helper.next_inputs(...)
//!
//! Декодер не хранит состояние между шагами: всё состояние передаётся
//! явно через `state`, случайность (если есть) живёт в helper'е.

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use seq2seq_core::{
    Decoder, DecoderOutput, DecoderStep, Helper, OutputDtypes, OutputShapes, RnnCell,
};

use crate::projection::OutputProjection;

/// Простой RNN-декодер с softmax-проекцией выхода ячейки.
pub struct BasicDecoder<C: RnnCell, H> {
    cell: C,
    helper: H,
    initial_state: C::State,
    projection: OutputProjection,
    max_decode_length: usize,
}

impl<C, H> BasicDecoder<C, H>
where
    C: RnnCell,
    H: Helper<C::State>,
{
    /// Создать декодер, загрузив выходную проекцию `cell.output_size() → vocab_size`.
    ///
    /// Веса проекции: `weight`, `bias` относительно `vb`.
    pub fn new(
        cell: C,
        helper: H,
        initial_state: C::State,
        vocab_size: usize,
        max_decode_length: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let projection = OutputProjection::load(cell.output_size(), vocab_size, vb)?;
        Ok(Self::with_projection(
            cell,
            helper,
            initial_state,
            projection,
            max_decode_length,
        ))
    }

    /// Создать декодер с уже загруженной проекцией.
    pub fn with_projection(
        cell: C,
        helper: H,
        initial_state: C::State,
        projection: OutputProjection,
        max_decode_length: usize,
    ) -> Self {
        Self {
            cell,
            helper,
            initial_state,
            projection,
            max_decode_length,
        }
    }

    /// cell_output [B, H] → logits [B, vocab_size].
    pub fn compute_output(&self, cell_output: &Tensor) -> Result<Tensor> {
        self.projection.forward(cell_output)
    }

    pub fn vocab_size(&self) -> usize {
        self.projection.vocab_size()
    }

    pub fn cell(&self) -> &C {
        &self.cell
    }

    pub fn helper(&self) -> &H {
        &self.helper
    }

    pub fn initial_state(&self) -> &C::State {
        &self.initial_state
    }
}

impl<C, H> Decoder for BasicDecoder<C, H>
where
    C: RnnCell,
    H: Helper<C::State>,
{
    type State = C::State;

    fn batch_size(&self) -> usize {
        self.helper.batch_size()
    }

    fn max_decode_length(&self) -> usize {
        self.max_decode_length
    }

    fn output_size(&self) -> OutputShapes {
        OutputShapes::new(self.projection.vocab_size(), self.cell.output_size())
    }

    fn output_dtype(&self) -> OutputDtypes {
        OutputDtypes {
            logits: self.projection.dtype(),
            cell_output: self.cell.dtype(),
            ..OutputDtypes::default()
        }
    }

    fn initialize(&mut self) -> Result<(Tensor, Tensor, C::State)> {
        let (finished, first_inputs) = self.helper.initialize()?;
        Ok((finished, first_inputs, self.initial_state.clone()))
    }

    fn step(
        &mut self,
        time: usize,
        inputs: &Tensor,
        state: C::State,
    ) -> Result<DecoderStep<C::State>> {
        let (cell_output, cell_state) = self.cell.step(inputs, &state)?;
        let logits = self.compute_output(&cell_output)?;
        let sample_ids = self.helper.sample(time, &logits, &cell_state)?;

        let outputs = DecoderOutput {
            logits,
            predicted_ids: sample_ids,
            cell_output,
        };
        let (finished, next_inputs, next_state) =
            self.helper
                .next_inputs(time, &outputs, cell_state, &outputs.predicted_ids)?;

        Ok(DecoderStep {
            outputs,
            next_state,
            next_inputs,
            finished,
        })
    }
}
