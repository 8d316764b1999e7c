//! # seq2seq-decoders
//!
//! RNN-декодеры для sequence-to-sequence моделей на Candle.
//!
//! - [`cell`]: LSTM / GRU / многослойные ячейки
//! - [`projection`]: линейная проекция выхода ячейки на словарь
//! - [`helper`]: стратегии выбора токена и подачи входов
//! - [`basic_decoder`]: один шаг декодирования ([`BasicDecoder`])
//! - [`decode`]: цикл [`dynamic_decode`]
//! - [`model`]: загрузка весов и готовые режимы декодирования

pub mod basic_decoder;
pub mod cell;
pub mod decode;
pub mod helper;
pub mod model;
pub mod projection;

pub use basic_decoder::BasicDecoder;
pub use cell::{ConfiguredCell, ConfiguredState, GruCell, LstmCell, LstmState, StackedCell};
pub use decode::{dynamic_decode, DecodeOptions, FinalDecoderOutput};
pub use helper::{GreedyEmbeddingHelper, SampleEmbeddingHelper, TrainingHelper};
pub use model::Seq2SeqDecoderModel;
pub use projection::OutputProjection;
