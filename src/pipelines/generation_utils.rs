// Copyright 2018 The Google AI Language Team Authors, Facebook AI Research authors.
// Copyright 2018 Google AI, Google Brain and Carnegie Mellon University Authors and the HuggingFace Inc. team.
// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Natural Language Generation utilities
//! Deterministic beam search (greedy decoding for a single beam) for encoder-decoder models. The encoder runs once per batch, the
//! decoder is then stepped one token at a time, re-using cached keys and values.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use t5_translate::pipelines::generation_utils::{EncoderDecoderGenerator, GenerateConfig};
//! use t5_translate::resources::RemoteResource;
//! use t5_translate::t5::{T5ConfigResources, T5Generator, T5ModelResources};
//! use tch::{Device, Tensor};
//!
//! let generator = T5Generator::new(
//!     &RemoteResource::from_pretrained(T5ConfigResources::T5_SMALL),
//!     &RemoteResource::from_pretrained(T5ModelResources::T5_SMALL),
//!     Device::Cpu,
//! )?;
//! let input_ids = Tensor::from_slice(&[13959i64, 1566, 12, 2968, 10, 8774, 1]).unsqueeze(0);
//! let attention_mask = input_ids.ones_like();
//! let generate_config = GenerateConfig {
//!     num_beams: 4,
//!     max_length: 64,
//!     ..Default::default()
//! };
//! let output = generator.generate_from_ids(&input_ids, &attention_mask, &generate_config)?;
//! # Ok(())
//! # }
//! ```

use crate::common::error::TranslateError;
use ordered_float::OrderedFloat;
use tch::{Device, Kind, Tensor};

/// # Configuration for beam search generation
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    /// Minimum sequence length, EOS is banned below it (default: 0)
    pub min_length: i64,
    /// Maximum sequence length, including the decoder start token (default: 300)
    pub max_length: i64,
    /// Early stopping flag indicating if the beam search should stop as soon as `num_beam` hypotheses have been generated (default: true)
    pub early_stopping: bool,
    /// Number of beams for beam search (default: 4)
    pub num_beams: i64,
    /// Exponential penalty based on the length of the hypotheses generated (default: 2.0)
    pub length_penalty: f64,
    /// Token forced at the start of the decoder input. Falls back to the model's default if None (default: None)
    pub decoder_start_token_id: Option<i64>,
}

impl Default for GenerateConfig {
    fn default() -> GenerateConfig {
        GenerateConfig {
            min_length: 0,
            max_length: 300,
            early_stopping: true,
            num_beams: 4,
            length_penalty: 2.0,
            decoder_start_token_id: None,
        }
    }
}

impl GenerateConfig {
    /// Checks that the generation parameters are consistent.
    pub fn validate(&self) -> Result<(), TranslateError> {
        if self.num_beams < 1 {
            return Err(TranslateError::InvalidConfigurationError(format!(
                "num_beams must be strictly greater than 0, got {}",
                self.num_beams
            )));
        }
        if self.max_length < 1 {
            return Err(TranslateError::InvalidConfigurationError(format!(
                "max_length must be strictly greater than 0, got {}",
                self.max_length
            )));
        }
        if self.min_length < 0 || self.min_length > self.max_length {
            return Err(TranslateError::InvalidConfigurationError(format!(
                "min_length must be between 0 and max_length ({}), got {}",
                self.max_length, self.min_length
            )));
        }
        if !self.length_penalty.is_finite() {
            return Err(TranslateError::InvalidConfigurationError(format!(
                "length_penalty must be a finite number, got {}",
                self.length_penalty
            )));
        }
        Ok(())
    }
}

/// # Encoder-decoder generation seam
/// Shared trait between sequence-to-sequence models usable with the beam search below.
/// Implementors only provide the forward primitives, `generate_from_ids` drives the search.
pub trait EncoderDecoderGenerator {
    /// Decoder cache carried between generation steps
    type Cache;

    /// Device holding the model weights
    fn get_device(&self) -> Device;

    /// Size of the output vocabulary (last dimension of the logits)
    fn get_vocab_size(&self) -> i64;

    fn get_pad_id(&self) -> i64;

    fn get_eos_id(&self) -> i64;

    /// Default token used to start decoding
    fn get_decoder_start_id(&self) -> i64;

    /// Runs the encoder.
    ///
    /// # Arguments
    ///
    /// * `input_ids` - Tensor of shape (*batch size*, *source_sequence_length*)
    /// * `attention_mask` - Tensor of shape (*batch size*, *source_sequence_length*), 1 for tokens to attend to
    ///
    /// # Returns
    ///
    /// * Encoder hidden states of shape (*batch size*, *source_sequence_length*, *hidden_size*)
    fn encode(&self, input_ids: &Tensor, attention_mask: &Tensor)
        -> Result<Tensor, TranslateError>;

    /// Runs one decoder step.
    ///
    /// # Arguments
    ///
    /// * `decoder_input_ids` - New decoder tokens of shape (*batch size*, *new_tokens*)
    /// * `encoder_hidden_states` - Encoder output of shape (*batch size*, *source_sequence_length*, *hidden_size*)
    /// * `encoder_attention_mask` - Mask of shape (*batch size*, *source_sequence_length*)
    /// * `cache` - Cache returned by the previous step, None at the first step
    ///
    /// # Returns
    ///
    /// * Logits of shape (*batch size*, *new_tokens*, *vocab_size*) and the updated cache
    fn decode_step(
        &self,
        decoder_input_ids: &Tensor,
        encoder_hidden_states: &Tensor,
        encoder_attention_mask: &Tensor,
        cache: Option<Self::Cache>,
    ) -> Result<(Tensor, Option<Self::Cache>), TranslateError>;

    /// Re-orders the cache along the batch dimension after beams were selected.
    fn reorder_cache(&self, cache: &mut Self::Cache, beam_indices: &Tensor);

    /// Generates the best beam search hypothesis for each input row. A single beam falls back
    /// to greedy decoding.
    ///
    /// # Arguments
    ///
    /// * `input_ids` - Tensor of shape (*batch size*, *source_sequence_length*)
    /// * `attention_mask` - Tensor of shape (*batch size*, *source_sequence_length*)
    /// * `generate_config` - Beam search parameters
    ///
    /// # Returns
    ///
    /// * One token sequence per input row, starting with the decoder start token
    fn generate_from_ids(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        generate_config: &GenerateConfig,
    ) -> Result<Vec<Vec<i64>>, TranslateError>
    where
        Self: Sized,
    {
        generate_config.validate()?;
        tch::no_grad(|| {
            if generate_config.num_beams == 1 {
                generate_greedy(self, input_ids, attention_mask, generate_config)
            } else {
                generate_beam_search(self, input_ids, attention_mask, generate_config)
            }
        })
    }
}

fn tensor_to_vec_f64(tensor: &Tensor) -> Result<Vec<f64>, TranslateError> {
    Ok(Vec::<f64>::try_from(
        tensor
            .to_device(Device::Cpu)
            .to_kind(Kind::Double)
            .flatten(0, -1),
    )?)
}

fn tensor_to_vec_i64(tensor: &Tensor) -> Result<Vec<i64>, TranslateError> {
    Ok(Vec::<i64>::try_from(
        tensor
            .to_device(Device::Cpu)
            .to_kind(Kind::Int64)
            .flatten(0, -1),
    )?)
}

fn generate_greedy<G: EncoderDecoderGenerator>(
    generator: &G,
    input_ids: &Tensor,
    attention_mask: &Tensor,
    generate_config: &GenerateConfig,
) -> Result<Vec<Vec<i64>>, TranslateError> {
    let batch_size = input_ids.size()[0];
    if batch_size == 0 {
        return Ok(vec![]);
    }
    let device = generator.get_device();
    let pad_token_id = generator.get_pad_id();
    let eos_token_id = generator.get_eos_id();
    let decoder_start_token_id = generate_config
        .decoder_start_token_id
        .unwrap_or_else(|| generator.get_decoder_start_id());

    let input_ids = input_ids.to_device(device);
    let attention_mask = attention_mask.to_device(device);
    let encoder_hidden_states = generator.encode(&input_ids, &attention_mask)?;

    let mut sequences = vec![vec![decoder_start_token_id]; batch_size as usize];
    let mut unfinished = vec![true; batch_size as usize];
    let mut decoder_input_ids = Tensor::full(
        [batch_size, 1],
        decoder_start_token_id,
        (Kind::Int64, device),
    );
    let mut cache: Option<G::Cache> = None;
    let mut current_length = 1;

    while current_length < generate_config.max_length {
        let (logits, next_cache) = generator.decode_step(
            &decoder_input_ids,
            &encoder_hidden_states,
            &attention_mask,
            cache.take(),
        )?;
        let mut scores = logits.select(1, -1);
        if current_length < generate_config.min_length {
            let _ = scores.index_fill_(
                1,
                &Tensor::from_slice(&[eos_token_id]).to(device),
                f64::NEG_INFINITY,
            );
        }
        let next_tokens = tensor_to_vec_i64(&scores.argmax(-1, false))?;

        // finished rows keep being fed padding
        let mut tokens_to_add = Vec::with_capacity(next_tokens.len());
        for (row, &token) in next_tokens.iter().enumerate() {
            if unfinished[row] {
                sequences[row].push(token);
                tokens_to_add.push(token);
                unfinished[row] = token != eos_token_id;
            } else {
                tokens_to_add.push(pad_token_id);
            }
        }
        if !unfinished.contains(&true) {
            break;
        }

        decoder_input_ids = Tensor::from_slice(&tokens_to_add).view((-1, 1)).to(device);
        cache = next_cache;
        current_length += 1;
    }
    Ok(sequences)
}

fn generate_beam_search<G: EncoderDecoderGenerator>(
    generator: &G,
    input_ids: &Tensor,
    attention_mask: &Tensor,
    generate_config: &GenerateConfig,
) -> Result<Vec<Vec<i64>>, TranslateError> {
    let batch_size = input_ids.size()[0];
    if batch_size == 0 {
        return Ok(vec![]);
    }
    let num_beams = generate_config.num_beams;
    let device = generator.get_device();
    let vocab_size = generator.get_vocab_size();
    let pad_token_id = generator.get_pad_id();
    let eos_token_id = generator.get_eos_id();
    let decoder_start_token_id = generate_config
        .decoder_start_token_id
        .unwrap_or_else(|| generator.get_decoder_start_id());

    let input_ids = input_ids.to_device(device);
    let attention_mask = attention_mask.to_device(device);
    let encoder_hidden_states = generator.encode(&input_ids, &attention_mask)?;

    let expanded_batch_indices = Tensor::arange(batch_size, (Kind::Int64, device))
        .view((-1, 1))
        .repeat([1, num_beams])
        .view(-1);
    let encoder_hidden_states = encoder_hidden_states.index_select(0, &expanded_batch_indices);
    let encoder_attention_mask = attention_mask.index_select(0, &expanded_batch_indices);

    let mut hypotheses = (0..batch_size)
        .map(|_| {
            BeamHypotheses::new(
                num_beams,
                generate_config.length_penalty,
                generate_config.early_stopping,
            )
        })
        .collect::<Vec<BeamHypotheses>>();

    let mut beam_scores = (0..batch_size * num_beams)
        .map(|index| if index % num_beams == 0 { 0f64 } else { -1e9 })
        .collect::<Vec<f64>>();
    let mut decoder_input_ids = Tensor::full(
        [batch_size * num_beams, 1],
        decoder_start_token_id,
        (Kind::Int64, device),
    );
    let mut done = vec![false; batch_size as usize];
    let mut cache: Option<G::Cache> = None;
    let mut current_length = 1;
    let candidates_per_batch = 2 * num_beams as usize;

    while current_length < generate_config.max_length {
        let (logits, next_cache) = generator.decode_step(
            &decoder_input_ids.narrow(1, current_length - 1, 1),
            &encoder_hidden_states,
            &encoder_attention_mask,
            cache.take(),
        )?;
        let mut scores = logits.select(1, -1).log_softmax(-1, Kind::Float);
        if current_length < generate_config.min_length {
            let _ = scores.index_fill_(
                1,
                &Tensor::from_slice(&[eos_token_id]).to(device),
                f64::NEG_INFINITY,
            );
        }
        let next_scores = scores
            + Tensor::from_slice(&beam_scores)
                .to_kind(Kind::Float)
                .to(device)
                .unsqueeze(-1);
        let (next_scores, next_tokens) = next_scores
            .view((batch_size, num_beams * vocab_size))
            .topk(2 * num_beams, 1, true, true);
        let next_scores = tensor_to_vec_f64(&next_scores)?;
        let next_tokens = tensor_to_vec_i64(&next_tokens)?;

        let mut next_beams: Vec<(f64, i64, i64)> =
            Vec::with_capacity((batch_size * num_beams) as usize);
        for batch_index in 0..batch_size as usize {
            if done[batch_index] {
                next_beams.extend((0..num_beams).map(|_| (0f64, pad_token_id, 0i64)));
                continue;
            }
            let offset = batch_index * candidates_per_batch;
            let mut batch_beams = Vec::with_capacity(num_beams as usize);
            for rank in 0..candidates_per_batch {
                let score = next_scores[offset + rank];
                let beam_id = next_tokens[offset + rank] / vocab_size;
                let token_id = next_tokens[offset + rank] % vocab_size;
                let effective_beam_id = batch_index as i64 * num_beams + beam_id;
                if token_id == eos_token_id {
                    if rank >= num_beams as usize {
                        continue;
                    }
                    hypotheses[batch_index].add(
                        tensor_to_vec_i64(&decoder_input_ids.get(effective_beam_id))?,
                        score,
                    );
                } else {
                    batch_beams.push((score, token_id, effective_beam_id));
                }
                if batch_beams.len() == num_beams as usize {
                    break;
                }
            }
            if batch_beams.len() != num_beams as usize {
                return Err(TranslateError::ValueError(format!(
                    "beam search selected {} continuations for {} beams",
                    batch_beams.len(),
                    num_beams
                )));
            }
            done[batch_index] =
                hypotheses[batch_index].is_done(next_scores[offset], current_length);
            next_beams.extend(batch_beams);
        }

        if done.iter().all(|&batch_done| batch_done) {
            break;
        }

        beam_scores = next_beams.iter().map(|(score, _, _)| *score).collect();
        let beam_tokens = Tensor::from_slice(
            &next_beams
                .iter()
                .map(|(_, token, _)| *token)
                .collect::<Vec<i64>>(),
        )
        .to(device);
        let beam_indices = Tensor::from_slice(
            &next_beams
                .iter()
                .map(|(_, _, index)| *index)
                .collect::<Vec<i64>>(),
        )
        .to(device);

        decoder_input_ids = Tensor::cat(
            &[
                decoder_input_ids.index_select(0, &beam_indices),
                beam_tokens.unsqueeze(1),
            ],
            -1,
        );
        cache = next_cache.map(|mut layer_cache| {
            generator.reorder_cache(&mut layer_cache, &beam_indices);
            layer_cache
        });
        current_length += 1;
    }

    for (batch_index, batch_hypotheses) in hypotheses.iter_mut().enumerate() {
        if done[batch_index] {
            continue;
        }
        for beam_index in 0..num_beams {
            let effective_beam_id = batch_index as i64 * num_beams + beam_index;
            batch_hypotheses.add(
                tensor_to_vec_i64(&decoder_input_ids.get(effective_beam_id))?,
                beam_scores[effective_beam_id as usize],
            );
        }
    }

    hypotheses
        .into_iter()
        .map(|batch_hypotheses| {
            batch_hypotheses.into_best().ok_or_else(|| {
                TranslateError::ValueError("beam search produced no hypothesis".to_string())
            })
        })
        .collect()
}

/// Best finished hypotheses of a single batch item, scored by length-normalized log probability.
#[derive(Debug, Clone)]
pub(crate) struct BeamHypotheses {
    length_penalty: f64,
    early_stopping: bool,
    num_beams: usize,
    beams: Vec<(f64, Vec<i64>)>,
    worst_score: f64,
}

impl BeamHypotheses {
    pub(crate) fn new(num_beams: i64, length_penalty: f64, early_stopping: bool) -> BeamHypotheses {
        BeamHypotheses {
            length_penalty,
            early_stopping,
            num_beams: num_beams as usize,
            beams: Vec::with_capacity(num_beams as usize + 1),
            worst_score: 1e9f64,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.beams.len()
    }

    pub(crate) fn add(&mut self, hypothesis: Vec<i64>, sum_log_probabilities: f64) {
        let score = sum_log_probabilities / (hypothesis.len() as f64).powf(self.length_penalty);
        if self.len() < self.num_beams || score > self.worst_score {
            self.beams.push((score, hypothesis));
            if self.len() > self.num_beams {
                if let Some((worst_score_position, _)) = self
                    .beams
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, (score, _))| OrderedFloat(*score))
                {
                    let _ = self.beams.remove(worst_score_position);
                }
            }
            self.worst_score = self
                .beams
                .iter()
                .map(|(score, _)| OrderedFloat(*score))
                .min()
                .map_or(score, |worst| worst.0);
        }
    }

    pub(crate) fn is_done(&self, best_sum_log_probabilities: f64, current_length: i64) -> bool {
        if self.len() < self.num_beams {
            false
        } else if self.early_stopping {
            true
        } else {
            self.worst_score
                >= best_sum_log_probabilities / (current_length as f64).powf(self.length_penalty)
        }
    }

    pub(crate) fn into_best(self) -> Option<Vec<i64>> {
        self.beams
            .into_iter()
            .max_by_key(|(score, _)| OrderedFloat(*score))
            .map(|(_, hypothesis)| hypothesis)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_generate_config_is_valid() {
        let config = GenerateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_beams, 4);
        assert_eq!(config.max_length, 300);
        assert!(config.early_stopping);
    }

    #[test]
    fn invalid_generate_config_is_rejected() {
        for config in [
            GenerateConfig {
                num_beams: 0,
                ..Default::default()
            },
            GenerateConfig {
                max_length: 0,
                ..Default::default()
            },
            GenerateConfig {
                min_length: 400,
                ..Default::default()
            },
            GenerateConfig {
                length_penalty: f64::NAN,
                ..Default::default()
            },
            GenerateConfig {
                length_penalty: f64::INFINITY,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                config.validate(),
                Err(TranslateError::InvalidConfigurationError(_))
            ));
        }
    }

    #[test]
    fn zero_and_negative_length_penalties_are_valid() {
        for length_penalty in [0.0, -0.5] {
            let config = GenerateConfig {
                length_penalty,
                ..Default::default()
            };
            assert!(config.validate().is_ok());
        }
        // no length normalization
        let mut hypotheses = BeamHypotheses::new(1, 0.0, false);
        hypotheses.add(vec![0, 5, 6, 1], -2.0);
        assert_eq!(hypotheses.worst_score, -2.0);
    }

    #[test]
    fn beam_hypotheses_keep_the_best_entries() {
        let mut hypotheses = BeamHypotheses::new(2, 1.0, false);
        hypotheses.add(vec![0, 5, 1], -3.0);
        hypotheses.add(vec![0, 6, 1], -1.5);
        hypotheses.add(vec![0, 7, 1], -6.0);
        assert_eq!(hypotheses.len(), 2);

        hypotheses.add(vec![0, 8, 1], -0.3);
        assert_eq!(hypotheses.len(), 2);
        assert_eq!(hypotheses.worst_score, -0.5);
        assert_eq!(hypotheses.into_best(), Some(vec![0, 8, 1]));
    }

    #[test]
    fn beam_hypotheses_apply_length_penalty() {
        let mut hypotheses = BeamHypotheses::new(1, 2.0, false);
        hypotheses.add(vec![0, 1], -4.0);
        assert_eq!(hypotheses.worst_score, -1.0);
        // -9 / 3^2 = -1, not strictly better
        hypotheses.add(vec![0, 5, 1], -9.0);
        assert_eq!(hypotheses.into_best(), Some(vec![0, 1]));
    }

    #[test]
    fn beam_hypotheses_completion() {
        let mut hypotheses = BeamHypotheses::new(2, 1.0, false);
        assert!(!hypotheses.is_done(-1.0, 2));
        hypotheses.add(vec![0, 1], -2.0);
        hypotheses.add(vec![0, 2], -2.0);
        // worst score -1.0, an open beam at -4.0 over length 2 cannot beat it
        assert!(hypotheses.is_done(-4.0, 2));
        assert!(!hypotheses.is_done(-1.0, 2));

        let mut early_stopping = BeamHypotheses::new(1, 1.0, true);
        assert!(!early_stopping.is_done(0.0, 1));
        early_stopping.add(vec![0, 1], -10.0);
        assert!(early_stopping.is_done(0.0, 1));
    }

    #[test]
    fn empty_hypotheses_have_no_best() {
        assert_eq!(BeamHypotheses::new(3, 1.0, true).into_best(), None);
    }
}
