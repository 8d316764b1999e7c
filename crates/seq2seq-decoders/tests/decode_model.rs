//! Интеграционные тесты: сохранение/загрузка модели и режимы декодирования.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use seq2seq_core::{CellType, Decoder, DecoderConfig};
use seq2seq_decoders::{dynamic_decode, DecodeOptions, GreedyEmbeddingHelper, Seq2SeqDecoderModel};

fn tiny_config(cell_type: CellType) -> DecoderConfig {
    let mut config = match cell_type {
        CellType::Lstm => DecoderConfig::basic_lstm_small(),
        CellType::Gru => DecoderConfig::basic_gru_small(),
    };
    config.model_name = "tiny".to_string();
    config.vocab_size = 16;
    config.embedding_dim = 6;
    config.cell.num_units = 10;
    config.max_decode_length = 8;
    config.start_token = 1;
    config.end_token = 2;
    config
}

fn tiny_model(cell_type: CellType) -> Seq2SeqDecoderModel {
    let device = Device::Cpu;
    let config = tiny_config(cell_type);
    let weights = Seq2SeqDecoderModel::random_weights(&config, 0, &device).unwrap();
    let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
    Seq2SeqDecoderModel::from_var_builder(config, vb).unwrap()
}

#[test]
fn test_save_and_load_roundtrip() {
    let device = Device::Cpu;
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config(CellType::Gru);
    let weights = Seq2SeqDecoderModel::random_weights(&config, 0, &device).unwrap();
    Seq2SeqDecoderModel::save_weights(&config, &weights, dir.path()).unwrap();

    let loaded = Seq2SeqDecoderModel::load(dir.path(), &device).unwrap();
    assert_eq!(loaded.config(), &config);

    let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
    let in_memory = Seq2SeqDecoderModel::from_var_builder(config, vb).unwrap();

    let a = loaded.decode_greedy(&[1, 1, 3], None, None).unwrap();
    let b = in_memory.decode_greedy(&[1, 1, 3], None, None).unwrap();
    assert_eq!(a.predicted_sequences().unwrap(), b.predicted_sequences().unwrap());
}

#[test]
fn test_greedy_decode_shapes() {
    for cell_type in [CellType::Lstm, CellType::Gru] {
        let model = tiny_model(cell_type);
        let out = model.decode_greedy(&[1, 5], None, None).unwrap();

        assert!(out.steps >= 1 && out.steps <= 8);
        assert_eq!(out.outputs.logits.dims(), &[2, out.steps, 16]);
        assert_eq!(out.outputs.predicted_ids.dims(), &[2, out.steps]);
        assert_eq!(out.outputs.cell_output.dims(), &[2, out.steps, 10]);
        for (seq, &len) in out.predicted_sequences().unwrap().iter().zip(&out.sequence_lengths) {
            assert_eq!(seq.len(), len);
            // Последовательность короче лимита заканчивается на end_token.
            if len < 8 {
                assert_eq!(seq.last(), Some(&2));
            }
        }
    }
}

#[test]
fn test_max_decode_length_override() {
    let model = tiny_model(CellType::Lstm);
    let out = model.decode_greedy(&[1], None, Some(1)).unwrap();
    assert_eq!(out.steps, 1);
    assert_eq!(out.sequence_lengths, vec![1]);
}

#[test]
fn test_stepwise_equals_dynamic_decode() {
    // Два ручных шага с возвращённым состоянием == первые два шага цикла.
    let model = tiny_model(CellType::Lstm);
    let helper =
        GreedyEmbeddingHelper::new(model.embedding().clone(), &[1, 4], model.config().end_token)
            .unwrap();
    let mut decoder = model.decoder(helper, model.zero_state(2).unwrap(), Some(2));

    let (_, inputs, state) = decoder.initialize().unwrap();
    let first = decoder.step(0, &inputs, state).unwrap();
    let second = decoder.step(1, &first.next_inputs, first.next_state).unwrap();

    let full = dynamic_decode(&mut decoder, DecodeOptions::default()).unwrap();
    let steps = full.steps;
    let manual = Tensor::stack(&[&first.outputs.logits, &second.outputs.logits], 1).unwrap();
    let manual: Vec<Vec<Vec<f32>>> = manual.narrow(1, 0, steps).unwrap().to_vec3().unwrap();
    let looped: Vec<Vec<Vec<f32>>> = full.outputs.logits.to_vec3().unwrap();

    for (m_row, l_row) in manual.iter().zip(&looped) {
        for (m_step, l_step) in m_row.iter().zip(l_row) {
            for (m, l) in m_step.iter().zip(l_step) {
                assert!((m - l).abs() < 1e-5);
            }
        }
    }
}

#[test]
fn test_sampled_decode_is_reproducible() {
    let model = tiny_model(CellType::Gru);
    let a = model.decode_sampled(&[1, 1, 1], None, 0.8, 17, None).unwrap();
    let b = model.decode_sampled(&[1, 1, 1], None, 0.8, 17, None).unwrap();
    assert_eq!(a.predicted_sequences().unwrap(), b.predicted_sequences().unwrap());
    assert_eq!(a.sequence_lengths, b.sequence_lengths);
}

#[test]
fn test_teacher_forced_lengths() {
    let device = Device::Cpu;
    let model = tiny_model(CellType::Lstm);
    let targets = Tensor::new(&[[1u32, 4, 5, 2], [1, 3, 2, 0]], &device).unwrap();
    let out = model
        .decode_teacher_forced(&targets, vec![4, 3], None)
        .unwrap();

    assert_eq!(out.steps, 4);
    assert_eq!(out.sequence_lengths, vec![4, 3]);
    assert_eq!(out.outputs.logits.dims(), &[2, 4, 16]);

    // Шаг за пределами длины второго примера обнулён.
    let tail: Vec<f32> = out
        .outputs
        .logits
        .narrow(0, 1, 1)
        .unwrap()
        .narrow(1, 3, 1)
        .unwrap()
        .flatten_all()
        .unwrap()
        .to_vec1()
        .unwrap();
    assert!(tail.iter().all(|&v| v == 0.0));
}

#[test]
fn test_teacher_forced_zero_length_example() {
    let device = Device::Cpu;
    let model = tiny_model(CellType::Gru);
    let targets = Tensor::new(&[[1u32, 4, 5], [1, 5, 5]], &device).unwrap();
    let out = model
        .decode_teacher_forced(&targets, vec![0, 2], None)
        .unwrap();

    assert_eq!(out.steps, 2);
    assert_eq!(out.sequence_lengths, vec![0, 2]);
    let sequences = out.predicted_sequences().unwrap();
    assert!(sequences[0].is_empty());
    assert_eq!(sequences[1].len(), 2);

    let first: Vec<f32> = out
        .outputs
        .logits
        .narrow(0, 0, 1)
        .unwrap()
        .flatten_all()
        .unwrap()
        .to_vec1()
        .unwrap();
    assert!(first.iter().all(|&v| v == 0.0));
}

#[test]
fn test_custom_initial_state() {
    let model = tiny_model(CellType::Gru);
    let zero = model.decode_greedy(&[1], None, Some(3)).unwrap();
    let explicit = model
        .decode_greedy(&[1], Some(model.zero_state(1).unwrap()), Some(3))
        .unwrap();
    assert_eq!(
        zero.predicted_sequences().unwrap(),
        explicit.predicted_sequences().unwrap()
    );
}
