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

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};
use tch::nn::{embedding, LinearConfig};
use tch::{nn, Device, Tensor};

use crate::common::resources::ResourceProvider;
use crate::pipelines::generation_utils::EncoderDecoderGenerator;
use crate::t5::attention::LayerState;
use crate::t5::encoder::T5Stack;
use crate::{Config, TranslateError};

/// # T5 Pretrained model weight files
pub struct T5ModelResources;

/// # T5 Pretrained model config files
pub struct T5ConfigResources;

/// # T5 Pretrained model vocab files
pub struct T5VocabResources;

impl T5ModelResources {
    /// Shared under Apache 2.0 license by the T5 Authors at <https://github.com/google-research/text-to-text-transfer-transformer>. Modified with conversion to C-array format.
    pub const T5_SMALL: (&'static str, &'static str) = (
        "t5-small/model",
        "https://huggingface.co/t5-small/resolve/main/rust_model.ot",
    );
    /// Shared under Apache 2.0 license by the T5 Authors at <https://github.com/google-research/text-to-text-transfer-transformer>. Modified with conversion to C-array format.
    pub const T5_BASE: (&'static str, &'static str) = (
        "t5-base/model",
        "https://huggingface.co/t5-base/resolve/main/rust_model.ot",
    );
}

impl T5ConfigResources {
    /// Shared under Apache 2.0 license by the Google team at <https://github.com/google-research/text-to-text-transfer-transformer>.
    pub const T5_SMALL: (&'static str, &'static str) = (
        "t5-small/config",
        "https://huggingface.co/t5-small/resolve/main/config.json",
    );
    /// Shared under Apache 2.0 license by the Google team at <https://github.com/google-research/text-to-text-transfer-transformer>.
    pub const T5_BASE: (&'static str, &'static str) = (
        "t5-base/config",
        "https://huggingface.co/t5-base/resolve/main/config.json",
    );
}

impl T5VocabResources {
    /// Shared under Apache 2.0 license by the Google team at <https://github.com/google-research/text-to-text-transfer-transformer>.
    pub const T5_SMALL: (&'static str, &'static str) = (
        "t5-small/spiece",
        "https://huggingface.co/t5-small/resolve/main/spiece.model",
    );
    /// Shared under Apache 2.0 license by the Google team at <https://github.com/google-research/text-to-text-transfer-transformer>.
    pub const T5_BASE: (&'static str, &'static str) = (
        "t5-base/spiece",
        "https://huggingface.co/t5-base/resolve/main/spiece.model",
    );
}

#[derive(Clone, Debug, Serialize, Deserialize, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
/// # Options for T5 Feed-forward projection layer
pub enum FeedForwardProj {
    /// ReLU
    Relu,
    /// Gated geLU
    GatedGelu,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
/// # T5 model configuration
/// Defines the T5 model architecture (e.g. number of layers, hidden layer size, special token ids...)
pub struct T5Config {
    pub dropout_rate: f64,
    pub d_model: i64,
    pub d_ff: i64,
    pub d_kv: i64,
    pub decoder_start_token_id: Option<i64>,
    pub eos_token_id: Option<i64>,
    pub initializer_factor: f64,
    pub is_encoder_decoder: Option<bool>,
    pub layer_norm_epsilon: f64,
    pub num_heads: i64,
    pub num_layers: i64,
    pub num_decoder_layers: Option<i64>,
    pub pad_token_id: Option<i64>,
    pub relative_attention_num_buckets: i64,
    pub relative_attention_max_distance: Option<i64>,
    pub vocab_size: i64,
    pub feed_forward_proj: Option<FeedForwardProj>,
    pub tie_word_embeddings: Option<bool>,
}

impl Config for T5Config {}

impl Default for T5Config {
    fn default() -> Self {
        T5Config {
            dropout_rate: 0.1,
            d_model: 512,
            d_ff: 2048,
            d_kv: 64,
            decoder_start_token_id: Some(0),
            eos_token_id: Some(1),
            initializer_factor: 1.0,
            is_encoder_decoder: Some(true),
            layer_norm_epsilon: 1e-6,
            num_heads: 8,
            num_layers: 6,
            num_decoder_layers: None,
            pad_token_id: Some(0),
            relative_attention_num_buckets: 32,
            relative_attention_max_distance: Some(128),
            vocab_size: 32128,
            feed_forward_proj: Some(FeedForwardProj::Relu),
            tie_word_embeddings: None,
        }
    }
}

/// # T5 Base model
/// Base architecture for T5 model. Usually complemented with a task-specific head, such as a language model head.
/// It is made of the following blocks:
/// - `encoder`: `T5Stack` (transformer) made of a vector of encoding layers
/// - `decoder`: `T5Stack` (transformer)  made of a vector of decoding layers with self attention and encoder cross-attention.
/// caching is implemented for the decoder to avoid recalculating static states (encoder key/values and previously calculated decoder key/values)
/// - `embeddings`: `nn::Embedding` Shared embeddings for the encoder and decoder.
pub struct T5Model {
    encoder: T5Stack,
    decoder: T5Stack,
    embeddings: nn::Embedding,
}

impl T5Model {
    /// Build a new `T5Model`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the T5 model
    /// * `config` - `T5Config` object defining the model architecture
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// use std::path::Path;
    /// use t5_translate::t5::{T5Config, T5Model};
    /// use t5_translate::Config;
    /// use tch::{nn, Device};
    ///
    /// let config_path = Path::new("path/to/config.json");
    /// let device = Device::Cpu;
    /// let p = nn::VarStore::new(device);
    /// let config = T5Config::from_file(config_path)?;
    /// let t5: T5Model = T5Model::new(&p.root(), &config);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new<'p, P>(p: P, config: &T5Config) -> T5Model
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let embeddings: nn::Embedding = embedding(
            p / "shared",
            config.vocab_size,
            config.d_model,
            Default::default(),
        );

        let encoder = T5Stack::new(p / "encoder", config, false, false);
        let decoder = T5Stack::new(p / "decoder", config, true, true);

        T5Model {
            encoder,
            decoder,
            embeddings,
        }
    }

    /// Runs the encoder only.
    ///
    /// # Arguments
    ///
    /// * `input_ids` - Input tensor of shape (*batch size*, *source_sequence_length*).
    /// * `attention_mask` - Optional attention mask of shape (*batch size*, *source_sequence_length*). Positions with a mask with value 0 will be masked.
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    pub fn encode(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor, TranslateError> {
        Ok(self
            .encoder
            .forward_t(
                input_ids,
                attention_mask,
                None,
                None,
                &self.embeddings,
                None,
                train,
            )?
            .hidden_state)
    }

    /// Forward pass through the model
    ///
    /// # Arguments
    ///
    /// * `input_ids` - Optional input tensor of shape (*batch size*, *source_sequence_length*). Required if `encoder_outputs` is not provided.
    /// * `attention_mask` - Optional attention mask of shape (*batch size*, *source_sequence_length*) for the encoder positions. Positions with a mask with value 0 will be masked.
    /// * `encoder_outputs` - Optional encoder last hidden state of shape (*batch size*, *source_sequence_length*, *hidden_size*). When provided, the encoder is not run again. Useful for generation tasks.
    /// * `decoder_input_ids` - Input tensor of shape (*batch size*, *target_sequence_length*). Only the new positions when a cache is provided.
    /// * `decoder_attention_mask` - Optional attention mask of shape (*batch size*, *past + target_sequence_length*) for the decoder positions.
    /// * `old_layer_states` - Optional vector of length `num_layers` containing tuples of optional `LayerStates` containing the last calculated key and value pairs for the decoder. This avoids recomputing attention weights at past positions and speeds up decoding.
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    ///
    /// # Returns
    ///
    /// * `T5ModelOutput` containing:
    ///   - `decoder_output` - `Tensor` of shape (*batch size*, *target_sequence_length*, *hidden_size*) representing the activations of the last decoder hidden state
    ///   - `encoder_hidden_state` - `Option<Tensor>` of shape (*batch size*, *source_sequence_length*, *hidden_size*), set if the encoder was run
    ///   - `next_cache` - `Option<Vec<(Option<LayerState>, Option<LayerState>)>>` of length *n_layer* containing the past keys and values for both the self attention and the encoder cross attention of each layer of the decoder.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// # use tch::{nn, Device, Tensor, no_grad, Kind};
    /// # use t5_translate::Config;
    /// # use std::path::Path;
    /// use t5_translate::t5::{T5Config, T5Model};
    /// # let config_path = Path::new("path/to/config.json");
    /// # let device = Device::Cpu;
    /// # let vs = nn::VarStore::new(device);
    /// # let config = T5Config::from_file(config_path)?;
    /// # let t5_model: T5Model = T5Model::new(&vs.root(), &config);
    /// let (batch_size, source_sequence_length, target_sequence_length) = (64, 128, 56);
    /// let input_tensor = Tensor::ones([batch_size, source_sequence_length], (Kind::Int64, device));
    /// let target_tensor = Tensor::ones([batch_size, target_sequence_length], (Kind::Int64, device));
    /// let encoder_attention_mask =
    ///     Tensor::ones([batch_size, source_sequence_length], (Kind::Int64, device));
    ///
    /// let model_output = no_grad(|| {
    ///     t5_model.forward_t(
    ///         Some(&input_tensor),
    ///         Some(&encoder_attention_mask),
    ///         None,
    ///         &target_tensor,
    ///         None,
    ///         None,
    ///         false,
    ///     )
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    #[allow(clippy::too_many_arguments)]
    pub fn forward_t(
        &self,
        input_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        encoder_outputs: Option<&Tensor>,
        decoder_input_ids: &Tensor,
        decoder_attention_mask: Option<&Tensor>,
        old_layer_states: Option<Vec<(Option<LayerState>, Option<LayerState>)>>,
        train: bool,
    ) -> Result<T5ModelOutput, TranslateError> {
        let calc_hidden_states = match (encoder_outputs, input_ids) {
            (None, Some(input_ids)) => Some(self.encode(input_ids, attention_mask, train)?),
            _ => None,
        };
        let encoder_output = encoder_outputs
            .or(calc_hidden_states.as_ref())
            .ok_or_else(|| {
                TranslateError::ValueError(
                    "Either input ids or encoder outputs must be provided".into(),
                )
            })?;

        let decoder_output = self.decoder.forward_t(
            decoder_input_ids,
            decoder_attention_mask,
            Some(encoder_output),
            attention_mask,
            &self.embeddings,
            old_layer_states,
            train,
        )?;

        Ok(T5ModelOutput {
            decoder_output: decoder_output.hidden_state,
            encoder_hidden_state: calc_hidden_states,
            next_cache: decoder_output.next_cache,
        })
    }
}

/// # T5 Model for conditional generation
/// T5 model with a vocabulary decoding head
/// It is made of the following blocks:
/// - `base_model`: `T5Model` Base T5 model
/// - `model_dim`: `f64` representation of the model dimension for scaling of the generated logits
/// - `lm_head`: separate projection to the vocabulary, used when the word embeddings are not tied
pub struct T5ForConditionalGeneration {
    base_model: T5Model,
    model_dim: f64,
    lm_head: Option<nn::Linear>,
}

impl T5ForConditionalGeneration {
    /// Build a new `T5ForConditionalGeneration`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the T5 model
    /// * `config` - `T5Config` object defining the model architecture
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// use std::path::Path;
    /// use t5_translate::t5::{T5Config, T5ForConditionalGeneration};
    /// use t5_translate::Config;
    /// use tch::{nn, Device};
    ///
    /// let config_path = Path::new("path/to/config.json");
    /// let device = Device::Cpu;
    /// let p = nn::VarStore::new(device);
    /// let config = T5Config::from_file(config_path)?;
    /// let t5 = T5ForConditionalGeneration::new(&p.root(), &config);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new<'p, P>(p: P, config: &T5Config) -> T5ForConditionalGeneration
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let base_model = T5Model::new(p, config);

        let lm_head = if !config.tie_word_embeddings.unwrap_or(true) {
            Some(nn::linear(
                p / "lm_head",
                config.d_model,
                config.vocab_size,
                LinearConfig {
                    bias: false,
                    ..Default::default()
                },
            ))
        } else {
            None
        };

        T5ForConditionalGeneration {
            base_model,
            model_dim: config.d_model as f64,
            lm_head,
        }
    }

    /// Forward pass through the model. Arguments are the same as for [`T5Model::forward_t`].
    ///
    /// # Returns
    ///
    /// * `T5ModelOutput` whose `decoder_output` holds the logits of shape (*batch size*, *target_sequence_length*, *vocab_size*)
    #[allow(clippy::too_many_arguments)]
    pub fn forward_t(
        &self,
        input_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        encoder_outputs: Option<&Tensor>,
        decoder_input_ids: &Tensor,
        decoder_attention_mask: Option<&Tensor>,
        old_layer_states: Option<Vec<(Option<LayerState>, Option<LayerState>)>>,
        train: bool,
    ) -> Result<T5ModelOutput, TranslateError> {
        let base_model_output = self.base_model.forward_t(
            input_ids,
            attention_mask,
            encoder_outputs,
            decoder_input_ids,
            decoder_attention_mask,
            old_layer_states,
            train,
        )?;

        let lm_logits = match &self.lm_head {
            Some(lm_head) => base_model_output.decoder_output.apply(lm_head),
            None => {
                base_model_output
                    .decoder_output
                    .linear::<Tensor>(&self.base_model.embeddings.ws, None)
                    * (self.model_dim.powf(-0.5))
            }
        };

        Ok(T5ModelOutput {
            decoder_output: lm_logits,
            ..base_model_output
        })
    }

    pub fn encode(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
    ) -> Result<Tensor, TranslateError> {
        self.base_model.encode(input_ids, attention_mask, false)
    }
}

/// Container holding a T5 model output. The decoder output may hold the hidden state of
/// the last layer of the decoder, or logits for the language modeling head.
pub struct T5ModelOutput {
    /// Hidden state of the last layer of the decoder, or logits for the language modeling head
    pub decoder_output: Tensor,
    /// Hidden state for the last layer of the encoder if they are calculated, otherwise None
    pub encoder_hidden_state: Option<Tensor>,
    /// Cached outputs of the model (attention layers keys and values) if the model is used for generation
    pub next_cache: Option<Vec<(Option<LayerState>, Option<LayerState>)>>,
}

/// # T5 generator
/// Holds a `T5ForConditionalGeneration` and its variable store, and exposes the forward
/// primitives used by the beam search.
pub struct T5Generator {
    model: T5ForConditionalGeneration,
    var_store: nn::VarStore,
    pad_token_id: i64,
    eos_token_id: i64,
    decoder_start_id: i64,
    vocab_size: i64,
}

impl T5Generator {
    /// Loads a pretrained generator from a configuration and weights resource.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// use t5_translate::resources::RemoteResource;
    /// use t5_translate::t5::{T5ConfigResources, T5Generator, T5ModelResources};
    /// use tch::Device;
    ///
    /// let generator = T5Generator::new(
    ///     &RemoteResource::from_pretrained(T5ConfigResources::T5_SMALL),
    ///     &RemoteResource::from_pretrained(T5ModelResources::T5_SMALL),
    ///     Device::cuda_if_available(),
    /// )?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new<C, M>(
        config_resource: &C,
        model_resource: &M,
        device: Device,
    ) -> Result<T5Generator, TranslateError>
    where
        C: ResourceProvider + ?Sized,
        M: ResourceProvider + ?Sized,
    {
        let config_path = config_resource.get_local_path()?;
        let weights_path = model_resource.get_local_path()?;
        log::debug!("Reading T5 configuration from {}", config_path.display());
        let config = T5Config::from_file(&config_path)?;

        let mut generator = T5Generator::from_config(&config, device);
        log::info!(
            "Loading T5 weights from {} on {:?}",
            weights_path.display(),
            device
        );
        generator.var_store.load(&weights_path)?;
        Ok(generator)
    }

    /// Builds a generator with freshly initialized weights.
    pub fn from_config(config: &T5Config, device: Device) -> T5Generator {
        let var_store = nn::VarStore::new(device);
        let model = T5ForConditionalGeneration::new(var_store.root(), config);
        let pad_token_id = config.pad_token_id.unwrap_or(0);

        T5Generator {
            model,
            var_store,
            pad_token_id,
            eos_token_id: config.eos_token_id.unwrap_or(1),
            decoder_start_id: config.decoder_start_token_id.unwrap_or(pad_token_id),
            vocab_size: config.vocab_size,
        }
    }

    pub fn get_model(&self) -> &T5ForConditionalGeneration {
        &self.model
    }

    pub fn get_var_store(&self) -> &nn::VarStore {
        &self.var_store
    }
}

impl EncoderDecoderGenerator for T5Generator {
    type Cache = Vec<(Option<LayerState>, Option<LayerState>)>;

    fn get_device(&self) -> Device {
        self.var_store.device()
    }

    fn get_vocab_size(&self) -> i64 {
        self.vocab_size
    }

    fn get_pad_id(&self) -> i64 {
        self.pad_token_id
    }

    fn get_eos_id(&self) -> i64 {
        self.eos_token_id
    }

    fn get_decoder_start_id(&self) -> i64 {
        self.decoder_start_id
    }

    fn encode(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
    ) -> Result<Tensor, TranslateError> {
        self.model.encode(input_ids, Some(attention_mask))
    }

    fn decode_step(
        &self,
        decoder_input_ids: &Tensor,
        encoder_hidden_states: &Tensor,
        encoder_attention_mask: &Tensor,
        cache: Option<Self::Cache>,
    ) -> Result<(Tensor, Option<Self::Cache>), TranslateError> {
        let output = self.model.forward_t(
            None,
            Some(encoder_attention_mask),
            Some(encoder_hidden_states),
            decoder_input_ids,
            None,
            cache,
            false,
        )?;
        Ok((output.decoder_output, output.next_cache))
    }

    fn reorder_cache(&self, cache: &mut Self::Cache, beam_indices: &Tensor) {
        for (self_layer_state, encoder_layer_state) in cache.iter_mut() {
            if let Some(layer_state) = self_layer_state {
                layer_state.reorder_cache(beam_indices);
            }
            if let Some(layer_state) = encoder_layer_state {
                layer_state.reorder_cache(beam_indices);
            }
        }
    }
}
