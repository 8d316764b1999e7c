//! Рекуррентные ячейки: LSTM, GRU и многослойная обёртка.
//!
//! Весовые ключи (PyTorch-совместимые):
//! - decoder.rnn.lstm.weight_ih_l{i}: [4*hidden, input]
//! - decoder.rnn.lstm.weight_hh_l{i}: [4*hidden, hidden]
//! - decoder.rnn.lstm.bias_ih_l{i}, bias_hh_l{i}: [4*hidden]
//! - decoder.rnn.gru.*: то же с 3*hidden

use candle_core::{bail, DType, Device, Module, Result, Tensor, D};
use candle_nn::VarBuilder;
use tracing::debug;

use seq2seq_core::{CellConfig, CellType, RnnCell};

/// [D] → [1, D]; [B, D] без изменений.
fn ensure_2d(x: &Tensor) -> Result<Tensor> {
    if x.dims().len() == 1 {
        x.unsqueeze(0)
    } else {
        Ok(x.clone())
    }
}

/// Веса одного слоя: x @ W_ih^T + b_ih и h @ W_hh^T + b_hh.
#[derive(Debug, Clone)]
struct GateWeights {
    weight_ih: Tensor, // [gates*hidden, input_size]
    weight_hh: Tensor, // [gates*hidden, hidden_size]
    bias_ih: Tensor,   // [gates*hidden]
    bias_hh: Tensor,   // [gates*hidden]
}

impl GateWeights {
    fn load(
        gates: usize,
        input_size: usize,
        hidden_size: usize,
        layer_idx: usize,
        vb: &VarBuilder,
    ) -> Result<Self> {
        let gate_size = gates * hidden_size;
        Ok(Self {
            weight_ih: vb.get((gate_size, input_size), &format!("weight_ih_l{layer_idx}"))?,
            weight_hh: vb.get((gate_size, hidden_size), &format!("weight_hh_l{layer_idx}"))?,
            bias_ih: vb.get(gate_size, &format!("bias_ih_l{layer_idx}"))?,
            bias_hh: vb.get(gate_size, &format!("bias_hh_l{layer_idx}"))?,
        })
    }

    fn input_proj(&self, x: &Tensor) -> Result<Tensor> {
        x.matmul(&self.weight_ih.t()?)?.broadcast_add(&self.bias_ih)
    }

    fn hidden_proj(&self, h: &Tensor) -> Result<Tensor> {
        h.matmul(&self.weight_hh.t()?)?.broadcast_add(&self.bias_hh)
    }

    fn input_size(&self) -> Result<usize> {
        self.weight_ih.dim(1)
    }
}

// ---------------------------------------------------------------------------
// LSTM
// ---------------------------------------------------------------------------

/// Состояние LSTM-слоя.
#[derive(Debug, Clone)]
pub struct LstmState {
    /// Скрытое состояние [B, hidden].
    pub h: Tensor,
    /// Состояние ячейки [B, hidden].
    pub c: Tensor,
}

/// Один слой LSTM.
///
/// Формулы:
/// gates = x @ W_ih^T + h @ W_hh^T + b_ih + b_hh
/// i, f, g, o = gates.chunk(4)
/// c = sigmoid(f) * c_prev + sigmoid(i) * tanh(g)
/// h = sigmoid(o) * tanh(c)
#[derive(Debug, Clone)]
pub struct LstmCell {
    weights: GateWeights,
    hidden_size: usize,
}

impl LstmCell {
    pub fn load(
        input_size: usize,
        hidden_size: usize,
        layer_idx: usize,
        vb: &VarBuilder,
    ) -> Result<Self> {
        let weights = GateWeights::load(4, input_size, hidden_size, layer_idx, vb)?;
        Ok(Self {
            weights,
            hidden_size,
        })
    }

    pub fn input_size(&self) -> Result<usize> {
        self.weights.input_size()
    }
}

impl RnnCell for LstmCell {
    type State = LstmState;

    fn output_size(&self) -> usize {
        self.hidden_size
    }

    fn dtype(&self) -> DType {
        self.weights.weight_ih.dtype()
    }

    fn zero_state(&self, batch_size: usize, device: &Device) -> Result<LstmState> {
        let h = Tensor::zeros((batch_size, self.hidden_size), self.dtype(), device)?;
        Ok(LstmState { c: h.clone(), h })
    }

    fn step(&self, inputs: &Tensor, state: &LstmState) -> Result<(Tensor, LstmState)> {
        let x = ensure_2d(inputs)?;
        let h = ensure_2d(&state.h)?;
        let c = ensure_2d(&state.c)?;

        let gates = self
            .weights
            .input_proj(&x)?
            .broadcast_add(&self.weights.hidden_proj(&h)?)?;

        let hs = self.hidden_size;

        // input, forget, cell, output
        let i_gate = gates.narrow(D::Minus1, 0, hs)?;
        let f_gate = gates.narrow(D::Minus1, hs, hs)?;
        let g_gate = gates.narrow(D::Minus1, 2 * hs, hs)?;
        let o_gate = gates.narrow(D::Minus1, 3 * hs, hs)?;

        let i_gate = candle_nn::Activation::Sigmoid.forward(&i_gate)?;
        let f_gate = candle_nn::Activation::Sigmoid.forward(&f_gate)?;
        let g_gate = g_gate.tanh()?;
        let o_gate = candle_nn::Activation::Sigmoid.forward(&o_gate)?;

        let c_new = ((f_gate * c)? + (i_gate * g_gate)?)?;
        let h_new = (o_gate * c_new.tanh()?)?;

        Ok((
            h_new.clone(),
            LstmState {
                h: h_new,
                c: c_new,
            },
        ))
    }
}

// ---------------------------------------------------------------------------
// GRU
// ---------------------------------------------------------------------------

/// Один слой GRU (порядок гейтов r, z, n как в PyTorch).
///
/// r = sigmoid(x W_ir + b_ir + h W_hr + b_hr)
/// z = sigmoid(x W_iz + b_iz + h W_hz + b_hz)
/// n = tanh(x W_in + b_in + r * (h W_hn + b_hn))
/// h' = (1 - z) * n + z * h
#[derive(Debug, Clone)]
pub struct GruCell {
    weights: GateWeights,
    hidden_size: usize,
}

impl GruCell {
    pub fn load(
        input_size: usize,
        hidden_size: usize,
        layer_idx: usize,
        vb: &VarBuilder,
    ) -> Result<Self> {
        let weights = GateWeights::load(3, input_size, hidden_size, layer_idx, vb)?;
        Ok(Self {
            weights,
            hidden_size,
        })
    }

    pub fn input_size(&self) -> Result<usize> {
        self.weights.input_size()
    }
}

impl RnnCell for GruCell {
    type State = Tensor;

    fn output_size(&self) -> usize {
        self.hidden_size
    }

    fn dtype(&self) -> DType {
        self.weights.weight_ih.dtype()
    }

    fn zero_state(&self, batch_size: usize, device: &Device) -> Result<Tensor> {
        Tensor::zeros((batch_size, self.hidden_size), self.dtype(), device)
    }

    fn step(&self, inputs: &Tensor, state: &Tensor) -> Result<(Tensor, Tensor)> {
        let x = ensure_2d(inputs)?;
        let h = ensure_2d(state)?;

        let gi = self.weights.input_proj(&x)?;
        let gh = self.weights.hidden_proj(&h)?;

        let hs = self.hidden_size;
        let chunk = |t: &Tensor, idx: usize| t.narrow(D::Minus1, idx * hs, hs);

        let r = candle_nn::Activation::Sigmoid.forward(&(chunk(&gi, 0)? + chunk(&gh, 0)?)?)?;
        let z = candle_nn::Activation::Sigmoid.forward(&(chunk(&gi, 1)? + chunk(&gh, 1)?)?)?;
        let n = (chunk(&gi, 2)? + (r * chunk(&gh, 2)?)?)?.tanh()?;

        // (1 - z) * n + z * h
        let h_new = ((z.affine(-1.0, 1.0)? * n)? + (z * h)?)?;
        Ok((h_new.clone(), h_new))
    }
}

// ---------------------------------------------------------------------------
// Многослойная ячейка
// ---------------------------------------------------------------------------

/// Стек ячеек: выход слоя i подаётся на вход слоя i + 1.
#[derive(Debug, Clone)]
pub struct StackedCell<C> {
    layers: Vec<C>,
}

impl<C: RnnCell> StackedCell<C> {
    pub fn new(layers: Vec<C>) -> Result<Self> {
        if layers.is_empty() {
            bail!("StackedCell: нужен хотя бы один слой");
        }
        Ok(Self { layers })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[C] {
        &self.layers
    }
}

impl<C: RnnCell> RnnCell for StackedCell<C> {
    type State = Vec<C::State>;

    fn output_size(&self) -> usize {
        self.layers
            .last()
            .map(|layer| layer.output_size())
            .unwrap_or(0)
    }

    fn dtype(&self) -> DType {
        self.layers
            .last()
            .map(|layer| layer.dtype())
            .unwrap_or(DType::F32)
    }

    fn zero_state(&self, batch_size: usize, device: &Device) -> Result<Self::State> {
        self.layers
            .iter()
            .map(|layer| layer.zero_state(batch_size, device))
            .collect()
    }

    fn step(&self, inputs: &Tensor, state: &Self::State) -> Result<(Tensor, Self::State)> {
        if state.len() != self.layers.len() {
            bail!(
                "StackedCell: состояние на {} слоёв, ячейка из {} слоёв",
                state.len(),
                self.layers.len()
            );
        }

        let mut x = inputs.clone();
        let mut new_state = Vec::with_capacity(self.layers.len());
        for (layer, layer_state) in self.layers.iter().zip(state) {
            let (out, s) = layer.step(&x, layer_state)?;
            x = out;
            new_state.push(s);
        }
        Ok((x, new_state))
    }
}

// ---------------------------------------------------------------------------
// Ячейка из конфигурации
// ---------------------------------------------------------------------------

/// Ячейка, выбранная по `CellConfig`.
#[derive(Debug, Clone)]
pub enum ConfiguredCell {
    Lstm(StackedCell<LstmCell>),
    Gru(StackedCell<GruCell>),
}

/// Состояние [`ConfiguredCell`].
#[derive(Debug, Clone)]
pub enum ConfiguredState {
    Lstm(Vec<LstmState>),
    Gru(Vec<Tensor>),
}

impl ConfiguredState {
    /// Скрытые состояния h всех слоёв.
    pub fn hidden(&self) -> Vec<&Tensor> {
        match self {
            Self::Lstm(layers) => layers.iter().map(|s| &s.h).collect(),
            Self::Gru(layers) => layers.iter().collect(),
        }
    }
}

impl ConfiguredCell {
    /// Загрузка из safetensors.
    ///
    /// Ключи: `{lstm|gru}.{weight_ih,weight_hh,bias_ih,bias_hh}_l{i}`
    /// относительно `vb` (обычно `decoder.rnn`).
    pub fn load(config: &CellConfig, input_size: usize, vb: VarBuilder) -> Result<Self> {
        let cell_vb = vb.pp(config.cell_type.to_string());
        let layer_input = |i: usize| if i == 0 { input_size } else { config.num_units };

        let cell = match config.cell_type {
            CellType::Lstm => {
                let layers = (0..config.num_layers)
                    .map(|i| LstmCell::load(layer_input(i), config.num_units, i, &cell_vb))
                    .collect::<Result<Vec<_>>>()?;
                Self::Lstm(StackedCell::new(layers)?)
            }
            CellType::Gru => {
                let layers = (0..config.num_layers)
                    .map(|i| GruCell::load(layer_input(i), config.num_units, i, &cell_vb))
                    .collect::<Result<Vec<_>>>()?;
                Self::Gru(StackedCell::new(layers)?)
            }
        };

        debug!(
            "RNN-ячейка загружена: {} {}×{}, вход {}",
            config.cell_type, config.num_layers, config.num_units, input_size
        );

        Ok(cell)
    }

    pub fn cell_type(&self) -> CellType {
        match self {
            Self::Lstm(_) => CellType::Lstm,
            Self::Gru(_) => CellType::Gru,
        }
    }

    pub fn num_layers(&self) -> usize {
        match self {
            Self::Lstm(cell) => cell.num_layers(),
            Self::Gru(cell) => cell.num_layers(),
        }
    }
}

impl RnnCell for ConfiguredCell {
    type State = ConfiguredState;

    fn output_size(&self) -> usize {
        match self {
            Self::Lstm(cell) => cell.output_size(),
            Self::Gru(cell) => cell.output_size(),
        }
    }

    fn dtype(&self) -> DType {
        match self {
            Self::Lstm(cell) => cell.dtype(),
            Self::Gru(cell) => cell.dtype(),
        }
    }

    fn zero_state(&self, batch_size: usize, device: &Device) -> Result<ConfiguredState> {
        Ok(match self {
            Self::Lstm(cell) => ConfiguredState::Lstm(cell.zero_state(batch_size, device)?),
            Self::Gru(cell) => ConfiguredState::Gru(cell.zero_state(batch_size, device)?),
        })
    }

    fn step(&self, inputs: &Tensor, state: &ConfiguredState) -> Result<(Tensor, ConfiguredState)> {
        match (self, state) {
            (Self::Lstm(cell), ConfiguredState::Lstm(s)) => {
                let (out, s) = cell.step(inputs, s)?;
                Ok((out, ConfiguredState::Lstm(s)))
            }
            (Self::Gru(cell), ConfiguredState::Gru(s)) => {
                let (out, s) = cell.step(inputs, s)?;
                Ok((out, ConfiguredState::Gru(s)))
            }
            _ => bail!(
                "Состояние не соответствует типу ячейки {}",
                self.cell_type()
            ),
        }
    }
}
