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
use crate::t5::layer_norm::T5LayerNorm;
use crate::t5::T5Config;
use std::borrow::Borrow;
use tch::nn::LinearConfig;
use tch::{nn, Device, Kind, Tensor};

#[derive(Debug)]
/// # Cache for T5 attention layers
/// Stores the cached value of key and value to avoid recalculation (e.g. at each generation step)
pub struct LayerState {
    /// Cached keys, shape (*batch size*, *num_heads*, *key_length*, *d_kv*)
    pub prev_key: Tensor,
    /// Cached values, shape (*batch size*, *num_heads*, *key_length*, *d_kv*)
    pub prev_value: Tensor,
}

impl Clone for LayerState {
    fn clone(&self) -> Self {
        LayerState {
            prev_key: self.prev_key.copy(),
            prev_value: self.prev_value.copy(),
        }
    }
}

impl LayerState {
    pub(crate) fn reorder_cache(&mut self, new_indices: &Tensor) {
        self.prev_key = self.prev_key.index_select(0, new_indices);
        self.prev_value = self.prev_value.index_select(0, new_indices);
    }

    fn cached_length(&self) -> i64 {
        self.prev_key.size()[2]
    }
}

/// Maps relative positions to bucket indices. Half of the buckets are exact offsets, the other
/// half grow logarithmically up to `max_distance`, beyond which all positions share the last
/// bucket. Bidirectional (encoder) attention reserves separate buckets for positive offsets.
pub(crate) fn get_relative_position_bucket(
    relative_position: &Tensor,
    bidirectional: bool,
    num_buckets: i64,
    max_distance: i64,
) -> Tensor {
    let n = -relative_position;
    let mut num_buckets = num_buckets;
    let mut ret = n.zeros_like();

    let n = if bidirectional {
        num_buckets /= 2;
        ret += n.lt(0).to_kind(Kind::Int64) * num_buckets;
        n.abs()
    } else {
        n.max_other(&n.zeros_like())
    };

    let max_exact = num_buckets / 2;
    let is_small = n.lt(max_exact);

    let value_if_large: Tensor = ((n.to_kind(Kind::Float) / max_exact as f64).log()
        / (max_distance as f64 / max_exact as f64).ln()
        * (num_buckets - max_exact) as f64)
        .to_kind(Kind::Int64)
        + max_exact;

    let value_if_large = value_if_large.min_other(&value_if_large.full_like(num_buckets - 1));
    ret + n.where_self(&is_small, &value_if_large)
}

#[derive(Debug)]
pub struct T5Attention {
    is_decoder: bool,
    is_bidirectional: bool,
    store_cache: bool,
    relative_attention_num_buckets: i64,
    relative_attention_max_distance: i64,
    n_heads: i64,
    d_kv: i64,
    inner_dim: i64,
    dropout: Dropout,
    q: nn::Linear,
    k: nn::Linear,
    v: nn::Linear,
    o: nn::Linear,
    relative_attention_bias: Option<nn::Embedding>,
}

impl T5Attention {
    pub fn new<'p, P>(
        p: P,
        config: &T5Config,
        is_decoder: bool,
        is_bidirectional: bool,
        store_cache: bool,
        has_relative_attention_bias: bool,
    ) -> T5Attention
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let linear_config = LinearConfig {
            bias: false,
            ..Default::default()
        };

        let inner_dim = config.num_heads * config.d_kv;
        let k = nn::linear(p / "k", config.d_model, inner_dim, linear_config);
        let v = nn::linear(p / "v", config.d_model, inner_dim, linear_config);
        let q = nn::linear(p / "q", config.d_model, inner_dim, linear_config);
        let o = nn::linear(p / "o", inner_dim, config.d_model, linear_config);

        let dropout = Dropout::new(config.dropout_rate);
        let relative_attention_bias = if has_relative_attention_bias {
            Some(nn::embedding(
                p / "relative_attention_bias",
                config.relative_attention_num_buckets,
                config.num_heads,
                Default::default(),
            ))
        } else {
            None
        };

        T5Attention {
            is_decoder,
            is_bidirectional,
            store_cache,
            relative_attention_num_buckets: config.relative_attention_num_buckets,
            relative_attention_max_distance: config.relative_attention_max_distance.unwrap_or(128),
            n_heads: config.num_heads,
            d_kv: config.d_kv,
            inner_dim,
            dropout,
            q,
            k,
            v,
            o,
            relative_attention_bias,
        }
    }

    fn unshape(&self, x: Tensor, bs: i64) -> Tensor {
        x.transpose(1, 2)
            .contiguous()
            .view((bs, -1, self.inner_dim))
    }

    fn shape(&self, x: Tensor, bs: i64) -> Tensor {
        x.view((bs, -1, self.n_heads, self.d_kv)).transpose(1, 2)
    }

    /// Attention forward pass.
    ///
    /// * `kv` - encoder hidden states for cross-attention, `None` for self-attention
    /// * `position_bias` - bias computed by the first layer of the stack (already including the
    ///   attention mask). When `None`, the bias is computed here and returned for reuse.
    /// * `attention_mask` - additive mask, broadcastable to the attention scores
    /// * `layer_state` - cached keys and values from previous decoding steps
    ///
    /// Returns the context, the position bias (including mask) and the updated cache.
    pub fn forward_t(
        &self,
        hidden_states: &Tensor,
        kv: Option<&Tensor>,
        position_bias: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        layer_state: Option<LayerState>,
        train: bool,
    ) -> (Tensor, Tensor, Option<LayerState>) {
        let input_size = hidden_states.size();
        let (bs, q_len) = (input_size[0], input_size[1]);

        let q = self.shape(hidden_states.apply(&self.q), bs);

        let (k, v) = match (kv, &layer_state) {
            // cross-attention keys and values only depend on the encoder output
            (Some(_), Some(cached)) => (cached.prev_key.copy(), cached.prev_value.copy()),
            (Some(kv), None) => (
                self.shape(kv.apply(&self.k), bs),
                self.shape(kv.apply(&self.v), bs),
            ),
            (None, Some(cached)) => (
                Tensor::cat(
                    &[&cached.prev_key, &self.shape(hidden_states.apply(&self.k), bs)],
                    2,
                ),
                Tensor::cat(
                    &[
                        &cached.prev_value,
                        &self.shape(hidden_states.apply(&self.v), bs),
                    ],
                    2,
                ),
            ),
            (None, None) => (
                self.shape(hidden_states.apply(&self.k), bs),
                self.shape(hidden_states.apply(&self.v), bs),
            ),
        };
        let key_length = k.size()[2];

        let new_layer_state = if self.is_decoder & self.store_cache {
            Some(LayerState {
                prev_key: k.copy(),
                prev_value: v.copy(),
            })
        } else {
            None
        };

        let mut scores = q.matmul(&k.transpose(3, 2));

        let position_bias = match position_bias {
            Some(value) => value.copy(),
            None => {
                let mut bias = match &self.relative_attention_bias {
                    Some(embeddings) => {
                        // real query length includes the positions already decoded
                        let real_query_length = match (&layer_state, kv) {
                            (Some(cached), None) => cached.cached_length() + q_len,
                            _ => q_len,
                        };
                        self.compute_bias(
                            embeddings,
                            real_query_length,
                            key_length,
                            hidden_states.device(),
                        )
                        .narrow(2, real_query_length - q_len, q_len)
                    }
                    None => Tensor::zeros(
                        [1, self.n_heads, q_len, key_length],
                        (scores.kind(), scores.device()),
                    ),
                };
                if let Some(attention_mask) = attention_mask {
                    bias = bias + attention_mask;
                }
                bias
            }
        };

        scores += &position_bias;

        let attention_weights = scores
            .softmax(-1, Kind::Float)
            .to_kind(q.kind())
            .apply_t(&self.dropout, train);
        let context = self
            .unshape(attention_weights.matmul(&v), bs)
            .apply(&self.o);

        (context, position_bias, new_layer_state)
    }

    fn compute_bias(
        &self,
        embeddings: &nn::Embedding,
        q_len: i64,
        k_len: i64,
        device: Device,
    ) -> Tensor {
        let context_position = Tensor::arange(q_len, (Kind::Int64, device)).unsqueeze(1);
        let memory_position = Tensor::arange(k_len, (Kind::Int64, device)).unsqueeze(0);
        let relative_position = memory_position - context_position;

        let rp_bucket = get_relative_position_bucket(
            &relative_position,
            self.is_bidirectional,
            self.relative_attention_num_buckets,
            self.relative_attention_max_distance,
        );
        rp_bucket
            .apply(embeddings)
            .permute([2, 0, 1])
            .unsqueeze(0)
    }
}

pub struct T5LayerSelfAttention {
    self_attention: T5Attention,
    layer_norm: T5LayerNorm,
    dropout: Dropout,
}

impl T5LayerSelfAttention {
    pub fn new<'p, P>(
        p: P,
        config: &T5Config,
        has_relative_attention_bias: bool,
        is_decoder: bool,
        store_cache: bool,
    ) -> T5LayerSelfAttention
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let self_attention = T5Attention::new(
            p / "SelfAttention",
            config,
            is_decoder,
            !is_decoder,
            store_cache,
            has_relative_attention_bias,
        );

        let layer_norm =
            T5LayerNorm::new(p / "layer_norm", config.d_model, config.layer_norm_epsilon);
        let dropout = Dropout::new(config.dropout_rate);

        T5LayerSelfAttention {
            self_attention,
            layer_norm,
            dropout,
        }
    }

    pub fn forward_t(
        &self,
        hidden_states: &Tensor,
        position_bias: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        layer_state: Option<LayerState>,
        train: bool,
    ) -> (Tensor, Tensor, Option<LayerState>) {
        let norm_x = hidden_states.apply(&self.layer_norm);

        let (y, position_bias, layer_state) = self.self_attention.forward_t(
            &norm_x,
            None,
            position_bias,
            attention_mask,
            layer_state,
            train,
        );

        let output = hidden_states + y.apply_t(&self.dropout, train);

        (output, position_bias, layer_state)
    }
}

pub struct T5LayerCrossAttention {
    encoder_decoder_attention: T5Attention,
    layer_norm: T5LayerNorm,
    dropout: Dropout,
}

impl T5LayerCrossAttention {
    pub fn new<'p, P>(
        p: P,
        config: &T5Config,
        is_decoder: bool,
        store_cache: bool,
    ) -> T5LayerCrossAttention
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let encoder_decoder_attention = T5Attention::new(
            p / "EncDecAttention",
            config,
            is_decoder,
            true,
            store_cache,
            false,
        );

        let layer_norm =
            T5LayerNorm::new(p / "layer_norm", config.d_model, config.layer_norm_epsilon);
        let dropout = Dropout::new(config.dropout_rate);

        T5LayerCrossAttention {
            encoder_decoder_attention,
            layer_norm,
            dropout,
        }
    }

    pub fn forward_t(
        &self,
        hidden_states: &Tensor,
        kv: &Tensor,
        position_bias: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        layer_state: Option<LayerState>,
        train: bool,
    ) -> (Tensor, Tensor, Option<LayerState>) {
        let norm_x = hidden_states.apply(&self.layer_norm);

        let (y, position_bias, layer_state) = self.encoder_decoder_attention.forward_t(
            &norm_x,
            Some(kv),
            position_bias,
            attention_mask,
            layer_state,
            train,
        );

        let output = hidden_states + y.apply_t(&self.dropout, train);

        (output, position_bias, layer_state)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn buckets(relative_positions: &[i64], bidirectional: bool) -> Vec<i64> {
        let relative_position = Tensor::from_slice(relative_positions);
        let bucket = get_relative_position_bucket(&relative_position, bidirectional, 32, 128);
        Vec::<i64>::try_from(bucket).unwrap()
    }

    #[test]
    fn causal_buckets_ignore_future_positions() {
        // memory - context: negative values look backwards
        assert_eq!(buckets(&[0, -1, -2, 3], false), vec![0, 1, 2, 0]);
    }

    #[test]
    fn bidirectional_buckets_split_directions() {
        let values = buckets(&[0, -1, 1, 2], true);
        assert_eq!(values, vec![0, 1, 17, 18]);
    }

    #[test]
    fn far_positions_share_last_bucket() {
        let values = buckets(&[-500, -1000], false);
        assert_eq!(values, vec![31, 31]);
    }
}
