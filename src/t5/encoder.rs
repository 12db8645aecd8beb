// Copyright 2018 Mesh TensorFlow authors, T5 Authors and HuggingFace Inc. team.
// Copyright 2020 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::common::dropout::Dropout;
use crate::common::kind::get_min;
use crate::t5::attention::{LayerState, T5LayerCrossAttention, T5LayerSelfAttention};
use crate::t5::layer_norm::T5LayerNorm;
use crate::t5::t5_model::FeedForwardProj;
use crate::t5::T5Config;
use crate::TranslateError;
use std::borrow::Borrow;
use tch::nn::LinearConfig;
use tch::{nn, Kind, Tensor};

pub struct T5DenseReluDense {
    wi: nn::Linear,
    wo: nn::Linear,
    dropout: Dropout,
}

impl T5DenseReluDense {
    pub fn new<'p, P>(p: P, config: &T5Config) -> T5DenseReluDense
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let linear_config = LinearConfig {
            bias: false,
            ..Default::default()
        };
        let wi = nn::linear(p / "wi", config.d_model, config.d_ff, linear_config);
        let wo = nn::linear(p / "wo", config.d_ff, config.d_model, linear_config);
        let dropout = Dropout::new(config.dropout_rate);

        T5DenseReluDense { wi, wo, dropout }
    }

    pub fn forward_t(&self, hidden_states: &Tensor, train: bool) -> Tensor {
        hidden_states
            .apply(&self.wi)
            .relu()
            .apply_t(&self.dropout, train)
            .apply(&self.wo)
    }
}

/// Gated-GeLU feed-forward used by the v1.1 checkpoints
pub struct T5DenseGatedGeluDense {
    wi_0: nn::Linear,
    wi_1: nn::Linear,
    wo: nn::Linear,
    dropout: Dropout,
}

impl T5DenseGatedGeluDense {
    pub fn new<'p, P>(p: P, config: &T5Config) -> T5DenseGatedGeluDense
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let linear_config = LinearConfig {
            bias: false,
            ..Default::default()
        };
        let wi_0 = nn::linear(p / "wi_0", config.d_model, config.d_ff, linear_config);
        let wi_1 = nn::linear(p / "wi_1", config.d_model, config.d_ff, linear_config);
        let wo = nn::linear(p / "wo", config.d_ff, config.d_model, linear_config);
        let dropout = Dropout::new(config.dropout_rate);

        T5DenseGatedGeluDense {
            wi_0,
            wi_1,
            wo,
            dropout,
        }
    }

    pub fn forward_t(&self, hidden_states: &Tensor, train: bool) -> Tensor {
        let hidden_gelu = hidden_states.apply(&self.wi_0).gelu("tanh");
        let hidden_linear = hidden_states.apply(&self.wi_1);
        (hidden_gelu * hidden_linear)
            .apply_t(&self.dropout, train)
            .apply(&self.wo)
    }
}

enum T5FeedForward {
    Relu(T5DenseReluDense),
    GatedGelu(T5DenseGatedGeluDense),
}

pub struct T5LayerFF {
    feed_forward: T5FeedForward,
    layer_norm: T5LayerNorm,
    dropout: Dropout,
}

impl T5LayerFF {
    pub fn new<'p, P>(p: P, config: &T5Config) -> T5LayerFF
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let feed_forward = match config.feed_forward_proj.unwrap_or(FeedForwardProj::Relu) {
            FeedForwardProj::Relu => {
                T5FeedForward::Relu(T5DenseReluDense::new(p / "DenseReluDense", config))
            }
            FeedForwardProj::GatedGelu => {
                T5FeedForward::GatedGelu(T5DenseGatedGeluDense::new(p / "DenseReluDense", config))
            }
        };
        let layer_norm =
            T5LayerNorm::new(p / "layer_norm", config.d_model, config.layer_norm_epsilon);
        let dropout = Dropout::new(config.dropout_rate);

        T5LayerFF {
            feed_forward,
            layer_norm,
            dropout,
        }
    }

    pub fn forward_t(&self, hidden_states: &Tensor, train: bool) -> Tensor {
        let normed = hidden_states.apply(&self.layer_norm);
        let y = match &self.feed_forward {
            T5FeedForward::Relu(layer) => layer.forward_t(&normed, train),
            T5FeedForward::GatedGelu(layer) => layer.forward_t(&normed, train),
        };

        hidden_states + y.apply_t(&self.dropout, train)
    }
}

pub struct T5BlockOutput {
    pub hidden_states: Tensor,
    pub self_attention_position_bias: Tensor,
    pub cross_attention_position_bias: Option<Tensor>,
    pub cache: (Option<LayerState>, Option<LayerState>),
}

pub struct T5Block {
    self_attention: T5LayerSelfAttention,
    cross_attention: Option<T5LayerCrossAttention>,
    ff_layer: T5LayerFF,
}

impl T5Block {
    pub fn new<'p, P>(
        p: P,
        config: &T5Config,
        has_relative_attention_bias: bool,
        is_decoder: bool,
        store_cache: bool,
    ) -> T5Block
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow() / "layer";
        let mut module_index = 0;

        let self_attention = T5LayerSelfAttention::new(
            &p / module_index,
            config,
            has_relative_attention_bias,
            is_decoder,
            store_cache,
        );

        let cross_attention = if is_decoder {
            module_index += 1;
            Some(T5LayerCrossAttention::new(
                &p / module_index,
                config,
                is_decoder,
                store_cache,
            ))
        } else {
            None
        };
        module_index += 1;

        let ff_layer = T5LayerFF::new(&p / module_index, config);

        T5Block {
            self_attention,
            cross_attention,
            ff_layer,
        }
    }

    /// fp16 activations can overflow in the larger checkpoints
    pub(crate) fn clamp_hidden_states(hidden_states: Tensor) -> Tensor {
        if (hidden_states.kind() != Kind::Float)
            && (hidden_states
                .isinf()
                .any()
                .to_kind(Kind::Int64)
                .int64_value(&[])
                != 0)
        {
            let clamp_value = match hidden_states.kind() {
                Kind::Half => half::f16::MAX.to_f64() - 1000.,
                Kind::BFloat16 => half::bf16::MAX.to_f64() - 1000.,
                _ => f64::MAX,
            };
            hidden_states.clamp(-clamp_value, clamp_value)
        } else {
            hidden_states
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn forward_t(
        &self,
        hidden_states: &Tensor,
        attention_mask: Option<&Tensor>,
        position_bias: Option<&Tensor>,
        encoder_hidden_states: Option<&Tensor>,
        encoder_attention_mask: Option<&Tensor>,
        encoder_decoder_position_bias: Option<&Tensor>,
        layer_states: (Option<LayerState>, Option<LayerState>),
        train: bool,
    ) -> T5BlockOutput {
        let (hidden_states, self_attention_position_bias, self_attention_layer_past) = self
            .self_attention
            .forward_t(
                hidden_states,
                position_bias,
                attention_mask,
                layer_states.0,
                train,
            );
        let hidden_states = T5Block::clamp_hidden_states(hidden_states);

        let (hidden_states, cross_attention_position_bias, cross_attention_layer_past) =
            match (&self.cross_attention, encoder_hidden_states) {
                (Some(cross_attention), Some(encoder_hidden_states)) => {
                    let (hidden_states, position_bias, layer_past) = cross_attention.forward_t(
                        &hidden_states,
                        encoder_hidden_states,
                        encoder_decoder_position_bias,
                        encoder_attention_mask,
                        layer_states.1,
                        train,
                    );
                    (
                        T5Block::clamp_hidden_states(hidden_states),
                        Some(position_bias),
                        layer_past,
                    )
                }
                _ => (hidden_states, None, None),
            };

        let hidden_states =
            T5Block::clamp_hidden_states(self.ff_layer.forward_t(&hidden_states, train));

        T5BlockOutput {
            hidden_states,
            self_attention_position_bias,
            cross_attention_position_bias,
            cache: (self_attention_layer_past, cross_attention_layer_past),
        }
    }
}

pub struct T5StackOutput {
    pub hidden_state: Tensor,
    pub next_cache: Option<Vec<(Option<LayerState>, Option<LayerState>)>>,
}

/// Converts a `{0, 1}` mask into an additive mask (0 for kept positions, large negative for
/// masked positions) in the precision of the hidden states.
fn additive_mask(mask: &Tensor, kind: Kind) -> Result<Tensor, TranslateError> {
    let mask = mask.to_kind(kind);
    Ok((mask.ones_like() - mask) * get_min(kind)?)
}

pub struct T5Stack {
    blocks: Vec<T5Block>,
    final_layer_norm: T5LayerNorm,
    dropout: Dropout,
    is_decoder: bool,
    store_cache: bool,
}

impl T5Stack {
    pub fn new<'p, P>(p: P, config: &T5Config, is_decoder: bool, store_cache: bool) -> T5Stack
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let dropout = Dropout::new(config.dropout_rate);
        let num_layers = if is_decoder {
            config.num_decoder_layers.unwrap_or(config.num_layers)
        } else {
            config.num_layers
        };

        let p_layers = p / "block";
        let blocks = (0..num_layers)
            .map(|layer_index| {
                T5Block::new(
                    &p_layers / layer_index,
                    config,
                    layer_index == 0,
                    is_decoder,
                    store_cache,
                )
            })
            .collect::<Vec<T5Block>>();

        let final_layer_norm = T5LayerNorm::new(
            p / "final_layer_norm",
            config.d_model,
            config.layer_norm_epsilon,
        );

        T5Stack {
            blocks,
            final_layer_norm,
            dropout,
            is_decoder,
            store_cache,
        }
    }

    /// Forward pass through the stack.
    ///
    /// * `input_ids` - token ids of shape (*batch size*, *sequence_length*)
    /// * `attention_mask` - optional `{0, 1}` mask of shape (*batch size*, *sequence_length*),
    ///   covering past positions as well when a cache is provided
    /// * `encoder_hidden_states` - encoder output, required for the decoder
    /// * `encoder_attention_mask` - optional `{0, 1}` mask over the encoder positions
    /// * `embeddings` - shared token embeddings
    /// * `old_layer_states` - decoder cache from the previous step
    #[allow(clippy::too_many_arguments)]
    pub fn forward_t(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        encoder_hidden_states: Option<&Tensor>,
        encoder_attention_mask: Option<&Tensor>,
        embeddings: &nn::Embedding,
        old_layer_states: Option<Vec<(Option<LayerState>, Option<LayerState>)>>,
        train: bool,
    ) -> Result<T5StackOutput, TranslateError> {
        let input_embeddings = input_ids.apply(embeddings);
        let input_shape = input_ids.size();
        if input_shape.len() != 2 {
            return Err(TranslateError::ValueError(format!(
                "Expected input ids of shape (batch size, sequence length), got {:?}",
                input_shape
            )));
        }
        let (batch_size, sequence_length) = (input_shape[0], input_shape[1]);
        let kind = input_embeddings.kind();
        let device = input_embeddings.device();

        let past_length = old_layer_states
            .as_ref()
            .and_then(|layer_states| layer_states.first())
            .and_then(|(self_attention_state, _)| self_attention_state.as_ref())
            .map_or(0, |state| state.prev_key.size()[2]);
        let mask_seq_length = past_length + sequence_length;

        let attention_mask = match attention_mask {
            Some(value) => value.shallow_clone(),
            None => Tensor::ones([batch_size, mask_seq_length], (Kind::Int64, device)),
        };

        let extended_attention_mask = if self.is_decoder {
            // query at absolute position past_length + i sees keys 0..=past_length + i
            let key_positions = Tensor::arange(mask_seq_length, (Kind::Int64, device));
            let query_positions =
                Tensor::arange(sequence_length, (Kind::Int64, device)) + past_length;
            let causal_mask = key_positions
                .unsqueeze(0)
                .le_tensor(&query_positions.unsqueeze(1))
                .to_kind(Kind::Int64);
            let combined = causal_mask.unsqueeze(0).unsqueeze(0)
                * attention_mask.to_kind(Kind::Int64).unsqueeze(1).unsqueeze(1);
            additive_mask(&combined, kind)?
        } else {
            additive_mask(&attention_mask.unsqueeze(1).unsqueeze(1), kind)?
        };

        let encoder_extended_attention_mask = match (self.is_decoder, encoder_hidden_states) {
            (true, Some(encoder_hidden_states)) => {
                let encoder_attention_mask = match encoder_attention_mask {
                    Some(value) => value.shallow_clone(),
                    None => Tensor::ones(
                        [batch_size, encoder_hidden_states.size()[1]],
                        (Kind::Int64, device),
                    ),
                };
                Some(additive_mask(
                    &encoder_attention_mask.unsqueeze(1).unsqueeze(1),
                    kind,
                )?)
            }
            _ => None,
        };

        let mut next_cache: Option<Vec<(Option<LayerState>, Option<LayerState>)>> =
            if self.store_cache {
                match old_layer_states {
                    Some(values) => Some(values),
                    None => Some(vec![(None, None); self.blocks.len()]),
                }
            } else {
                None
            };
        let mut position_bias: Option<Tensor> = None;
        let mut encoder_decoder_position_bias: Option<Tensor> = None;
        let mut hidden_state = input_embeddings.apply_t(&self.dropout, train);

        for (layer_idx, layer) in self.blocks.iter().enumerate() {
            let layer_state = match &mut next_cache {
                Some(values) => std::mem::take(&mut values[layer_idx]),
                None => (None, None),
            };
            let block_output = layer.forward_t(
                &hidden_state,
                Some(&extended_attention_mask),
                position_bias.as_ref(),
                encoder_hidden_states,
                encoder_extended_attention_mask.as_ref(),
                encoder_decoder_position_bias.as_ref(),
                layer_state,
                train,
            );
            if layer_idx == 0 {
                position_bias = Some(block_output.self_attention_position_bias);
                encoder_decoder_position_bias = block_output.cross_attention_position_bias;
            }
            hidden_state = block_output.hidden_states;
            if let Some(values) = &mut next_cache {
                values[layer_idx] = block_output.cache;
            }
        }

        let hidden_state = hidden_state
            .apply(&self.final_layer_norm)
            .apply_t(&self.dropout, train);

        Ok(T5StackOutput {
            hidden_state,
            next_cache,
        })
    }
}
