//! # seq2seq-core
//!
//! Базовые типы, трейты и определения ошибок для RustSeq2Seq.
//!
//! Этот крейт предоставляет фундаментальные абстракции для остальных
//! крейтов в workspace:
//!
//! - Выход шага декодера [`DecoderOutput`] и дескрипторы его форм/типов
//! - Трейты [`RnnCell`], [`Helper`], [`Decoder`]
//! - Конфигурация декодера [`DecoderConfig`]
//! - Унифицированная обработка ошибок через [`Seq2SeqError`]

pub mod config;
pub mod debug;
pub mod error;
pub mod model_files;
pub mod traits;
pub mod types;

pub use config::{CellConfig, CellType, DecoderConfig, SamplingConfig, SamplingStrategy};
pub use error::{Seq2SeqError, Seq2SeqResult};
pub use model_files::ModelFiles;
pub use traits::{Decoder, Helper, RnnCell};
pub use types::{
    all_finished, finished_from_bools, finished_to_bools, DecoderOutput, DecoderStep,
    OutputDtypes, OutputShapes,
};
