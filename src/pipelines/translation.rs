// Copyright 2018-2020 The HuggingFace Inc. team.
// Copyright 2019-2020 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Translation pipeline
//! Translation with a pretrained T5 model. Each input is prefixed with the T5 task template
//! (e.g. `translate English to German:`), encoded, decoded with beam search and detokenized.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use t5_translate::pipelines::translation::{Language, TranslationConfig, TranslationModel};
//! use t5_translate::resources::RemoteResource;
//! use t5_translate::t5::{T5ConfigResources, T5ModelResources, T5VocabResources};
//! use tch::Device;
//!
//! let translation_config = TranslationConfig::new(
//!     RemoteResource::from_pretrained(T5ModelResources::T5_SMALL),
//!     RemoteResource::from_pretrained(T5ConfigResources::T5_SMALL),
//!     RemoteResource::from_pretrained(T5VocabResources::T5_SMALL),
//!     Language::English,
//!     Language::French,
//!     Device::cuda_if_available(),
//! );
//! let model = TranslationModel::new(translation_config)?;
//!
//! let input = [" This is a sentence to be translated"];
//! let output = model.translate(&input)?;
//! # Ok(())
//! # }
//! ```

use crate::common::error::TranslateError;
use crate::common::resources::ResourceProvider;
use crate::pipelines::batching::BatchTranslator;
use crate::pipelines::encoding::T5BatchEncoder;
use crate::pipelines::generation_utils::{EncoderDecoderGenerator, GenerateConfig};
use crate::t5::T5Generator;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use tch::Device;

#[cfg(feature = "remote")]
use crate::{
    resources::RemoteResource,
    t5::{T5ConfigResources, T5ModelResources, T5VocabResources},
};

/// Language
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Language {
    English,
    French,
    German,
    Romanian,
}

impl Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Language {
    pub fn get_iso_639_1_code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::French => "fr",
            Language::German => "de",
            Language::Romanian => "ro",
        }
    }
}

impl FromStr for Language {
    type Err = TranslateError;

    /// Parses a language name (`German`, `german`) or ISO 639-1 code (`de`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "english" | "en" => Ok(Language::English),
            "french" | "fr" => Ok(Language::French),
            "german" | "de" => Ok(Language::German),
            "romanian" | "ro" => Ok(Language::Romanian),
            _ => Err(TranslateError::InvalidConfigurationError(format!(
                "Unsupported language `{}`, expected one of English, French, German, Romanian",
                s
            ))),
        }
    }
}

/// Task prefix prepended to every input, e.g. `translate English to German:`.
pub fn task_prefix(source_language: Language, target_language: Language) -> String {
    format!("translate {} to {}:", source_language, target_language)
}

/// Prepends `prefix` to every text as is, the texts carry their own separating space.
pub fn prefix_texts<S: AsRef<str>>(prefix: &str, texts: &[S]) -> Vec<String> {
    texts
        .iter()
        .map(|text| format!("{}{}", prefix, text.as_ref()))
        .collect()
}

/// # Configuration for text translation
/// Contains information regarding the model to load and device to place the model on.
pub struct TranslationConfig {
    /// Model weights resource
    pub model_resource: Box<dyn ResourceProvider + Send>,
    /// Config resource
    pub config_resource: Box<dyn ResourceProvider + Send>,
    /// SentencePiece model resource
    pub vocab_resource: Box<dyn ResourceProvider + Send>,
    /// Language of the input texts (default: English)
    pub source_language: Language,
    /// Language of the generated texts (default: German)
    pub target_language: Language,
    /// Maximum number of tokens of an encoded input, longer inputs are truncated (default: 512)
    pub max_input_length: usize,
    /// Pad every input to `max_input_length` instead of the longest input of the batch (default: true)
    pub pad_to_max_length: bool,
    /// Minimum sequence length (default: 0)
    pub min_length: i64,
    /// Maximum sequence length (default: 300)
    pub max_length: i64,
    /// Early stopping flag indicating if the beam search should stop as soon as `num_beam` hypotheses have been generated (default: true)
    pub early_stopping: bool,
    /// Number of beams for beam search (default: 4)
    pub num_beams: i64,
    /// Exponential penalty based on the length of the hypotheses generated (default: 2.0)
    pub length_penalty: f64,
    /// Device to place the model on (default: CUDA/GPU when available)
    pub device: Device,
}

impl TranslationConfig {
    /// Create a new `TranslationConfig` from resources and a language pair.
    ///
    /// # Arguments
    ///
    /// * `model_resource` - The `ResourceProvider` pointing to the model weights
    /// * `config_resource` - The `ResourceProvider` pointing to the model configuration
    /// * `vocab_resource` - The `ResourceProvider` pointing to the SentencePiece model
    /// * `source_language` - Language of the inputs
    /// * `target_language` - Language to translate to
    /// * `device` - `Device` to place the model on, defaults to CUDA when available
    pub fn new<RM, RC, RV>(
        model_resource: RM,
        config_resource: RC,
        vocab_resource: RV,
        source_language: Language,
        target_language: Language,
        device: impl Into<Option<Device>>,
    ) -> TranslationConfig
    where
        RM: ResourceProvider + Send + 'static,
        RC: ResourceProvider + Send + 'static,
        RV: ResourceProvider + Send + 'static,
    {
        let device = device.into().unwrap_or_else(Device::cuda_if_available);
        let generate_config = GenerateConfig::default();

        TranslationConfig {
            model_resource: Box::new(model_resource),
            config_resource: Box::new(config_resource),
            vocab_resource: Box::new(vocab_resource),
            source_language,
            target_language,
            max_input_length: 512,
            pad_to_max_length: true,
            min_length: generate_config.min_length,
            max_length: generate_config.max_length,
            early_stopping: generate_config.early_stopping,
            num_beams: generate_config.num_beams,
            length_penalty: generate_config.length_penalty,
            device,
        }
    }

    fn generate_config(&self) -> GenerateConfig {
        GenerateConfig {
            min_length: self.min_length,
            max_length: self.max_length,
            early_stopping: self.early_stopping,
            num_beams: self.num_beams,
            length_penalty: self.length_penalty,
            decoder_start_token_id: None,
        }
    }
}

#[cfg(feature = "remote")]
impl Default for TranslationConfig {
    /// Pretrained `t5-base`, English to German
    fn default() -> TranslationConfig {
        TranslationConfig::new(
            RemoteResource::from_pretrained(T5ModelResources::T5_BASE),
            RemoteResource::from_pretrained(T5ConfigResources::T5_BASE),
            RemoteResource::from_pretrained(T5VocabResources::T5_BASE),
            Language::English,
            Language::German,
            None,
        )
    }
}

/// # TranslationModel to perform translation
pub struct TranslationModel {
    generator: T5Generator,
    encoder: T5BatchEncoder,
    generate_config: GenerateConfig,
    prefix: String,
}

impl TranslationModel {
    /// Build a new `TranslationModel`
    ///
    /// # Arguments
    ///
    /// * `translation_config` - `TranslationConfig` object containing the resource references (model, vocabulary, configuration), translation options and device placement (CPU/GPU)
    pub fn new(translation_config: TranslationConfig) -> Result<TranslationModel, TranslateError> {
        if translation_config.source_language == translation_config.target_language {
            return Err(TranslateError::InvalidConfigurationError(format!(
                "Source and target languages are both {}",
                translation_config.source_language
            )));
        }
        if translation_config.max_input_length == 0 {
            return Err(TranslateError::InvalidConfigurationError(
                "max_input_length must be strictly greater than 0".to_string(),
            ));
        }
        let mut generate_config = translation_config.generate_config();
        generate_config.validate()?;

        let generator = T5Generator::new(
            &*translation_config.config_resource,
            &*translation_config.model_resource,
            translation_config.device,
        )?;
        generate_config.decoder_start_token_id = Some(generator.get_pad_id());
        let vocab_path = translation_config.vocab_resource.get_local_path()?;
        let encoder = T5BatchEncoder::from_file(
            vocab_path,
            translation_config.max_input_length,
            translation_config.pad_to_max_length,
            generator.get_pad_id(),
        )?;

        Ok(TranslationModel::from_parts(
            generator,
            encoder,
            generate_config,
            translation_config.source_language,
            translation_config.target_language,
        ))
    }

    /// Assembles a model from an already loaded generator and encoder.
    pub fn from_parts(
        generator: T5Generator,
        encoder: T5BatchEncoder,
        generate_config: GenerateConfig,
        source_language: Language,
        target_language: Language,
    ) -> TranslationModel {
        TranslationModel {
            generator,
            encoder,
            generate_config,
            prefix: task_prefix(source_language, target_language),
        }
    }

    /// Task prefix prepended to the inputs
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Model inputs for `texts`: the task prefix followed by each text.
    pub fn prefixed<S: AsRef<str>>(&self, texts: &[S]) -> Vec<String> {
        prefix_texts(&self.prefix, texts)
    }

    /// Translates texts provided. Each text is appended to the task prefix as is, so
    /// inputs are expected to start with a separating space.
    ///
    /// # Arguments
    /// * `texts` - `&[S]` Array of texts to translate.
    ///
    /// # Returns
    /// * `Vec<String>` Translated texts, one per input
    pub fn translate<S>(&self, texts: &[S]) -> Result<Vec<String>, TranslateError>
    where
        S: AsRef<str>,
    {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let prefixed_texts = self.prefixed(texts);

        let encoded = self
            .encoder
            .encode_batch(&prefixed_texts, self.generator.get_device());
        let sequences = self.generator.generate_from_ids(
            &encoded.input_ids,
            &encoded.attention_mask,
            &self.generate_config,
        )?;
        Ok(self.encoder.decode_batch(&sequences))
    }
}

impl BatchTranslator for TranslationModel {
    fn translate_batch(&self, lines: &[String]) -> Result<Vec<String>, TranslateError> {
        self.translate(lines)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn task_prefix_names_both_languages() {
        assert_eq!(
            task_prefix(Language::English, Language::German),
            "translate English to German:"
        );
        assert_eq!(
            task_prefix(Language::English, Language::Romanian),
            "translate English to Romanian:"
        );
    }

    #[test]
    fn every_text_gets_the_task_prefix() {
        let prefix = task_prefix(Language::English, Language::French);
        let texts = [" The house is wonderful.", " Thank you.", " "];

        assert_eq!(
            prefix_texts(&prefix, &texts),
            vec![
                "translate English to French: The house is wonderful.",
                "translate English to French: Thank you.",
                "translate English to French: ",
            ]
        );
        assert!(prefix_texts(&prefix, &[] as &[&str]).is_empty());
    }

    #[test]
    fn languages_parse_from_names_and_codes() {
        assert_eq!("German".parse::<Language>().ok(), Some(Language::German));
        assert_eq!("french".parse::<Language>().ok(), Some(Language::French));
        assert_eq!("ro".parse::<Language>().ok(), Some(Language::Romanian));
        assert!(matches!(
            "Klingon".parse::<Language>(),
            Err(TranslateError::InvalidConfigurationError(_))
        ));
    }

    #[test]
    fn language_codes() {
        assert_eq!(Language::English.get_iso_639_1_code(), "en");
        assert_eq!(Language::German.get_iso_639_1_code(), "de");
    }

    #[test]
    #[ignore] // no need to run, compilation is enough to verify it is Send
    fn test() {
        let translation_config = TranslationConfig::new(
            crate::resources::LocalResource::from(std::path::PathBuf::from("rust_model.ot")),
            crate::resources::LocalResource::from(std::path::PathBuf::from("config.json")),
            crate::resources::LocalResource::from(std::path::PathBuf::from("spiece.model")),
            Language::English,
            Language::German,
            Device::Cpu,
        );
        let _: Box<dyn Send> = Box::new(TranslationModel::new(translation_config));
    }
}
