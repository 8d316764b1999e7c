//! Выходная проекция: cell_output → логиты по словарю.
//!
//! Полносвязный слой без активации:
//! logits = cell_output @ W^T + b
//!
//! Весовые ключи:
//! - decoder.output_projection.weight: [vocab_size, num_units]
//! - decoder.output_projection.bias: [vocab_size]

use candle_core::{DType, Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};
use tracing::debug;

/// Линейная проекция на словарь.
#[derive(Debug, Clone)]
pub struct OutputProjection {
    proj: Linear,
    input_size: usize,
    vocab_size: usize,
}

impl OutputProjection {
    /// Загрузка из safetensors (`weight`, `bias` относительно `vb`).
    pub fn load(input_size: usize, vocab_size: usize, vb: VarBuilder) -> Result<Self> {
        let proj = linear(input_size, vocab_size, vb)?;
        debug!("OutputProjection загружена: {} → {}", input_size, vocab_size);
        Ok(Self {
            proj,
            input_size,
            vocab_size,
        })
    }

    /// Собрать проекцию из готовых тензоров.
    pub fn from_weights(weight: Tensor, bias: Tensor) -> Result<Self> {
        let (vocab_size, input_size) = weight.dims2()?;
        Ok(Self {
            proj: Linear::new(weight, Some(bias)),
            input_size,
            vocab_size,
        })
    }

    /// cell_output [B, num_units] (или [num_units]) → logits [B, vocab_size].
    pub fn forward(&self, cell_output: &Tensor) -> Result<Tensor> {
        let x = if cell_output.dims().len() == 1 {
            cell_output.unsqueeze(0)?
        } else {
            cell_output.clone()
        };
        self.proj.forward(&x)
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn dtype(&self) -> DType {
        self.proj.weight().dtype()
    }
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;

    #[test]
    fn test_logits_last_dim_is_vocab() {
        let device = Device::Cpu;
        for vocab_size in [1, 7, 50] {
            let proj = OutputProjection::from_weights(
                Tensor::randn(0f32, 1.0, (vocab_size, 8), &device).unwrap(),
                Tensor::zeros(vocab_size, DType::F32, &device).unwrap(),
            )
            .unwrap();
            let x = Tensor::randn(0f32, 1.0, (3, 8), &device).unwrap();
            let logits = proj.forward(&x).unwrap();
            assert_eq!(logits.dims(), &[3, vocab_size]);
            assert_eq!(proj.vocab_size(), vocab_size);
        }
    }

    #[test]
    fn test_linear_without_activation() {
        let device = Device::Cpu;
        let weight = Tensor::new(&[[1f32, 0.0], [0.0, -1.0], [2.0, 1.0]], &device).unwrap();
        let bias = Tensor::new(&[0.5f32, 0.0, -1.0], &device).unwrap();
        let proj = OutputProjection::from_weights(weight, bias).unwrap();

        let x = Tensor::new(&[3f32, 4.0], &device).unwrap();
        let logits: Vec<Vec<f32>> = proj.forward(&x).unwrap().to_vec2().unwrap();
        // Отрицательные значения сохраняются: активации нет.
        assert_eq!(logits, vec![vec![3.5, -4.0, 9.0]]);
    }
}
