//! # T5 (Text-To-Text Transfer Transformer) (Raffel et al.)
//!
//! Implementation of the T5 language model ([Exploring the Limits of Transfer Learning with a Unified Text-to-Text Transformer](https://arxiv.org/abs/1910.10683) Raffel, Shazeer, Roberts, Lee, Narang, Matena, Zhou, Li, Liu, 2019).
//! The base model is implemented in the `t5_model::T5Model` struct. A conditional generation head is provided in
//! `T5ForConditionalGeneration`, and `T5Generator` wraps it for beam search decoding.
//!
//! # Model set-up and pre-trained weights loading
//!
//! All models expect the following resources:
//! - Configuration file expected to have a structure following the [Transformers library](https://github.com/huggingface/transformers)
//! - Model weights are expected to have a structure and parameter names following the [Transformers library](https://github.com/huggingface/transformers). A conversion using the Python utility scripts is required to convert the `.bin` weights to the `.ot` format.
//! - `T5Tokenizer` using a `spiece.model` SentencePiece model
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use rust_tokenizers::tokenizer::T5Tokenizer;
//! use t5_translate::resources::{LocalResource, ResourceProvider};
//! use t5_translate::t5::{T5Config, T5ForConditionalGeneration};
//! use t5_translate::Config;
//! use tch::{nn, Device};
//!
//! let config_resource = LocalResource::from_model_dir("path/to/t5-small", "config.json");
//! let vocab_resource = LocalResource::from_model_dir("path/to/t5-small", "spiece.model");
//! let weights_resource = LocalResource::from_model_dir("path/to/t5-small", "rust_model.ot");
//! let config_path = config_resource.get_local_path()?;
//! let vocab_path = vocab_resource.get_local_path()?;
//! let weights_path = weights_resource.get_local_path()?;
//!
//! let device = Device::cuda_if_available();
//! let mut vs = nn::VarStore::new(device);
//! let tokenizer = T5Tokenizer::from_file(vocab_path.to_str().unwrap_or_default(), false)?;
//! let config = T5Config::from_file(config_path)?;
//! let t5_model = T5ForConditionalGeneration::new(&vs.root(), &config);
//! vs.load(weights_path)?;
//!
//! # Ok(())
//! # }
//! ```

mod attention;
mod encoder;
mod layer_norm;
mod t5_model;

pub use attention::LayerState;
pub use t5_model::{
    FeedForwardProj, T5Config, T5ConfigResources, T5ForConditionalGeneration, T5Generator,
    T5Model, T5ModelOutput, T5ModelResources, T5VocabResources,
};
