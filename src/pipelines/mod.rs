//! # Ready-to-use translation pipeline
//!
//! End-to-end batch translation with a pretrained T5 model, split in the following layers:
//!
//! #### 1. Generation utilities
//! Deterministic beam search over any encoder-decoder model implementing
//! [`EncoderDecoderGenerator`](generation_utils::EncoderDecoderGenerator).
//!
//! #### 2. Encoding
//! Tokenization with the SentencePiece `T5Tokenizer`, truncation, padding and decoding.
//!
//! #### 3. Translation
//! Task prefix (`translate English to German:`), configuration and the ready-to-use `TranslationModel`.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use t5_translate::pipelines::translation::{TranslationConfig, TranslationModel};
//!
//! let model = TranslationModel::new(TranslationConfig::default())?;
//! let output = model.translate(&[" The house is wonderful."])?;
//! # Ok(())
//! # }
//! ```
//!
//! Output: \
//! ```no_run
//! # let output =
//! ["Das Haus ist wunderbar."]
//! # ;
//! ```
//!
//! #### 4. Batching
//! File-level driver translating contiguous batches of lines and writing one hypothesis per line.

pub mod batching;
pub mod encoding;
pub mod generation_utils;
pub mod translation;
