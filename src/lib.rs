//! Batch translation of text files with pretrained T5 models, in the style of a WMT evaluation
//! driver. The T5 encoder-decoder is implemented on top of [tch-rs](https://github.com/LaurentMazare/tch-rs)
//! and tokenization is handled by [rust-tokenizers](https://github.com/guillaume-be/rust-tokenizers).
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use t5_translate::pipelines::batching::{read_source_lines, translate_lines};
//! use t5_translate::pipelines::translation::{Language, TranslationConfig, TranslationModel};
//! use t5_translate::resources::RemoteResource;
//! use t5_translate::t5::{T5ConfigResources, T5ModelResources, T5VocabResources};
//! use tch::Device;
//!
//! let config = TranslationConfig::new(
//!     RemoteResource::from_pretrained(T5ModelResources::T5_SMALL),
//!     RemoteResource::from_pretrained(T5ConfigResources::T5_SMALL),
//!     RemoteResource::from_pretrained(T5VocabResources::T5_SMALL),
//!     Language::English,
//!     Language::German,
//!     Device::cuda_if_available(),
//! );
//! let model = TranslationModel::new(config)?;
//!
//! let lines = read_source_lines("newstest2014.en")?;
//! let mut output = std::io::stdout();
//! let written = translate_lines(&model, &lines, 16, &mut output)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Loading pretrained models
//!
//! Pretrained `t5-small` and `t5-base` resources are downloaded on first use (`remote` feature)
//! and cached under `~/.cache/.t5-translate`, or under the directory given by the
//! `T5_TRANSLATE_CACHE` environment variable. Local model directories holding `config.json`,
//! `spiece.model` and `rust_model.ot` can be used with
//! [`LocalResource`](resources::LocalResource).

mod common;
pub mod pipelines;
pub mod t5;

pub use common::error::TranslateError;
pub use common::resources;
pub use common::Config;
