use t5_translate::pipelines::encoding::T5BatchEncoder;
use t5_translate::pipelines::generation_utils::{EncoderDecoderGenerator, GenerateConfig};
use t5_translate::pipelines::translation::{Language, TranslationConfig, TranslationModel};
use t5_translate::resources::{RemoteResource, ResourceProvider};
use t5_translate::t5::{
    FeedForwardProj, T5Config, T5ConfigResources, T5Generator, T5ModelResources,
    T5VocabResources,
};
use tch::{Device, Kind, Tensor};

fn tiny_config() -> T5Config {
    T5Config {
        dropout_rate: 0.0,
        d_model: 16,
        d_ff: 32,
        d_kv: 4,
        num_heads: 2,
        num_layers: 2,
        vocab_size: 50,
        relative_attention_num_buckets: 8,
        relative_attention_max_distance: Some(16),
        ..Default::default()
    }
}

fn tiny_generator(config: &T5Config) -> T5Generator {
    tch::manual_seed(42);
    T5Generator::from_config(config, Device::Cpu)
}

fn source_batch() -> (Tensor, Tensor) {
    let input_ids = Tensor::from_slice(&[13i64, 7, 22, 1, 5, 9, 1, 0]).view((2, 4));
    let attention_mask = Tensor::from_slice(&[1i64, 1, 1, 1, 1, 1, 1, 0]).view((2, 4));
    (input_ids, attention_mask)
}

#[test]
fn t5_logits_shape() -> anyhow::Result<()> {
    let config = tiny_config();
    let generator = tiny_generator(&config);
    let (input_ids, attention_mask) = source_batch();
    let decoder_input_ids = Tensor::from_slice(&[0i64, 4, 8, 0, 3, 2]).view((2, 3));

    let output = tch::no_grad(|| {
        generator.get_model().forward_t(
            Some(&input_ids),
            Some(&attention_mask),
            None,
            &decoder_input_ids,
            None,
            None,
            false,
        )
    })?;

    assert_eq!(output.decoder_output.size(), vec![2, 3, 50]);
    assert_eq!(
        output
            .encoder_hidden_state
            .map(|hidden_state| hidden_state.size()),
        Some(vec![2, 4, 16])
    );
    assert_eq!(output.next_cache.map(|cache| cache.len()), Some(2));
    Ok(())
}

#[test]
fn t5_variables_follow_checkpoint_names() {
    let generator = tiny_generator(&tiny_config());
    let variables = generator.get_var_store().variables();

    for name in [
        "shared.weight",
        "encoder.block.0.layer.0.SelfAttention.relative_attention_bias.weight",
        "encoder.block.1.layer.1.DenseReluDense.wo.weight",
        "encoder.final_layer_norm.weight",
        "decoder.block.0.layer.0.SelfAttention.relative_attention_bias.weight",
        "decoder.block.1.layer.1.EncDecAttention.q.weight",
        "decoder.block.1.layer.2.DenseReluDense.wi.weight",
        "decoder.final_layer_norm.weight",
    ] {
        assert!(variables.contains_key(name), "missing variable {}", name);
    }
    assert!(!variables
        .contains_key("encoder.block.1.layer.0.SelfAttention.relative_attention_bias.weight"));
    assert!(!variables.contains_key("lm_head.weight"));
    assert_eq!(variables["shared.weight"].size(), vec![50, 16]);
}

#[test]
fn t5_gated_gelu_logits_shape() -> anyhow::Result<()> {
    let config = T5Config {
        feed_forward_proj: Some(FeedForwardProj::GatedGelu),
        tie_word_embeddings: Some(false),
        num_decoder_layers: Some(3),
        ..tiny_config()
    };
    let generator = tiny_generator(&config);
    let (input_ids, attention_mask) = source_batch();

    let encoder_output = tch::no_grad(|| generator.encode(&input_ids, &attention_mask))?;
    let (logits, cache) = tch::no_grad(|| {
        generator.decode_step(
            &Tensor::zeros([2, 1], (Kind::Int64, Device::Cpu)),
            &encoder_output,
            &attention_mask,
            None,
        )
    })?;

    assert_eq!(logits.size(), vec![2, 1, 50]);
    assert_eq!(cache.map(|cache| cache.len()), Some(3));
    Ok(())
}

#[test]
fn t5_cached_decoding_matches_full_decoding() -> anyhow::Result<()> {
    let config = tiny_config();
    let generator = tiny_generator(&config);
    let (input_ids, attention_mask) = source_batch();
    let decoder_input_ids = Tensor::from_slice(&[0i64, 4, 8, 0, 3, 2]).view((2, 3));

    let encoder_output = tch::no_grad(|| generator.encode(&input_ids, &attention_mask))?;
    let (full_logits, _) = tch::no_grad(|| {
        generator.decode_step(&decoder_input_ids, &encoder_output, &attention_mask, None)
    })?;

    let mut cache = None;
    let mut step_logits = vec![];
    for position in 0..3 {
        let (logits, next_cache) = tch::no_grad(|| {
            generator.decode_step(
                &decoder_input_ids.narrow(1, position, 1),
                &encoder_output,
                &attention_mask,
                cache.take(),
            )
        })?;
        step_logits.push(logits);
        cache = next_cache;
    }
    let incremental_logits = Tensor::cat(&step_logits, 1);

    assert!(full_logits.allclose(&incremental_logits, 1e-4, 1e-4, false));
    Ok(())
}

#[test]
fn t5_beam_search_output() -> anyhow::Result<()> {
    let config = tiny_config();
    let generator = tiny_generator(&config);
    let (input_ids, attention_mask) = source_batch();
    let generate_config = GenerateConfig {
        max_length: 8,
        num_beams: 3,
        ..Default::default()
    };

    let output = generator.generate_from_ids(&input_ids, &attention_mask, &generate_config)?;

    assert_eq!(output.len(), 2);
    for sequence in &output {
        assert_eq!(sequence.first(), Some(&0));
        assert!(sequence.len() as i64 <= generate_config.max_length);
        assert!(sequence.iter().all(|token| (0..50).contains(token)));
    }

    let second_run = generator.generate_from_ids(&input_ids, &attention_mask, &generate_config)?;
    assert_eq!(output, second_run);
    Ok(())
}

#[test]
fn t5_beam_search_respects_min_length() -> anyhow::Result<()> {
    let config = tiny_config();
    let generator = tiny_generator(&config);
    let (input_ids, attention_mask) = source_batch();
    let generate_config = GenerateConfig {
        min_length: 6,
        max_length: 6,
        num_beams: 2,
        early_stopping: false,
        ..Default::default()
    };

    let output = generator.generate_from_ids(&input_ids, &attention_mask, &generate_config)?;

    for sequence in &output {
        assert_eq!(sequence.len(), 6);
        assert!(!sequence.contains(&1));
    }
    Ok(())
}

#[test]
fn t5_single_beam_is_greedy() -> anyhow::Result<()> {
    let config = tiny_config();
    let generator = tiny_generator(&config);
    let (input_ids, attention_mask) = source_batch();
    let generate_config = GenerateConfig {
        max_length: 7,
        num_beams: 1,
        early_stopping: false,
        ..Default::default()
    };

    let output = generator.generate_from_ids(&input_ids, &attention_mask, &generate_config)?;

    assert_eq!(output.len(), 2);
    for (row, sequence) in output.iter().enumerate() {
        let row_input_ids = input_ids.narrow(0, row as i64, 1);
        let row_attention_mask = attention_mask.narrow(0, row as i64, 1);
        let encoder_output =
            tch::no_grad(|| generator.encode(&row_input_ids, &row_attention_mask))?;
        let mut expected = vec![0i64];
        while (expected.len() as i64) < generate_config.max_length
            && expected.last() != Some(&1)
        {
            let (logits, _) = tch::no_grad(|| {
                generator.decode_step(
                    &Tensor::from_slice(&expected).unsqueeze(0),
                    &encoder_output,
                    &row_attention_mask,
                    None,
                )
            })?;
            expected.push(logits.select(1, -1).argmax(-1, false).int64_value(&[0]));
        }
        assert_eq!(sequence, &expected);
    }
    Ok(())
}

#[test]
fn t5_beam_search_empty_batch() -> anyhow::Result<()> {
    let generator = tiny_generator(&tiny_config());
    let input_ids = Tensor::zeros([0, 4], (Kind::Int64, Device::Cpu));
    let attention_mask = input_ids.ones_like();

    let output =
        generator.generate_from_ids(&input_ids, &attention_mask, &GenerateConfig::default())?;

    assert!(output.is_empty());
    Ok(())
}

#[test]
#[cfg_attr(not(feature = "all-tests"), ignore)]
fn test_translation_t5() -> anyhow::Result<()> {
    let translation_config = TranslationConfig::new(
        RemoteResource::from_pretrained(T5ModelResources::T5_SMALL),
        RemoteResource::from_pretrained(T5ConfigResources::T5_SMALL),
        RemoteResource::from_pretrained(T5VocabResources::T5_SMALL),
        Language::English,
        Language::German,
        Device::cuda_if_available(),
    );
    let model = TranslationModel::new(translation_config)?;
    assert_eq!(model.prefix(), "translate English to German:");
    assert_eq!(
        model.prefixed(&[" Thank you."]),
        vec!["translate English to German: Thank you."]
    );

    let input = [
        " The house is wonderful.",
        " This is a short test sentence for a batch translation.",
        " Thank you.",
    ];
    let output = model.translate(&input)?;

    assert_eq!(output.len(), 3);
    assert!(output.iter().all(|translation| !translation.trim().is_empty()));
    assert_eq!(output, model.translate(&input)?);
    Ok(())
}

#[test]
#[cfg_attr(not(feature = "all-tests"), ignore)]
fn test_decoding_skips_special_tokens() -> anyhow::Result<()> {
    let vocab_path =
        RemoteResource::from_pretrained(T5VocabResources::T5_SMALL).get_local_path()?;
    let encoder = T5BatchEncoder::from_file(vocab_path, 512, false, 0)?;

    let token_ids = encoder.tokenize(&["Das Haus ist wunderbar."]).remove(0);
    assert_eq!(token_ids.last(), Some(&1));

    let mut generated = vec![0i64];
    generated.extend(&token_ids);
    generated.extend([0, 0]);
    let decoded = encoder.decode(&generated);

    assert_eq!(decoded.trim(), "Das Haus ist wunderbar.");
    assert!(!decoded.contains("</s>"));
    assert!(!decoded.contains("<pad>"));
    assert_eq!(encoder.decode_batch(&[generated]), vec![decoded]);
    Ok(())
}

#[test]
fn test_translation_t5_same_languages_rejected() {
    let translation_config = TranslationConfig::new(
        RemoteResource::from_pretrained(T5ModelResources::T5_SMALL),
        RemoteResource::from_pretrained(T5ConfigResources::T5_SMALL),
        RemoteResource::from_pretrained(T5VocabResources::T5_SMALL),
        Language::French,
        Language::French,
        Device::Cpu,
    );
    assert!(TranslationModel::new(translation_config).is_err());
}
