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

use anyhow::Context;
use clap::{Parser, ValueEnum};
use env_logger::Env;
use std::path::PathBuf;
use t5_translate::pipelines::batching::{
    read_source_lines, write_translations, BatchTranslator,
};
use t5_translate::pipelines::translation::{Language, TranslationConfig, TranslationModel};
use t5_translate::resources::{LocalResource, RemoteResource};
use t5_translate::t5::{T5ConfigResources, T5ModelResources, T5VocabResources};
use tch::Device;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum PretrainedModel {
    #[value(name = "t5-small")]
    T5Small,
    #[value(name = "t5-base")]
    T5Base,
}

#[derive(Parser, Debug)]
#[command(name = "evaluate-wmt")]
#[command(about = "Translate a file line by line with a pretrained T5 model")]
struct Args {
    /// Text file with one source sentence per line
    source_path: PathBuf,

    /// Destination of the translations, overwritten
    output_path: PathBuf,

    /// Number of lines translated per batch
    #[arg(long = "bs", default_value_t = 16, value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: u64,

    #[arg(long, default_value = "English")]
    source_language: Language,

    #[arg(long, default_value = "German")]
    target_language: Language,

    /// Pretrained checkpoint, ignored when --model-dir is set
    #[arg(long, value_enum, default_value_t = PretrainedModel::T5Base)]
    model: PretrainedModel,

    /// Directory holding config.json, spiece.model and rust_model.ot
    #[arg(long)]
    model_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 300)]
    max_length: i64,

    #[arg(long, default_value_t = 4)]
    num_beams: i64,

    #[arg(long, default_value_t = 2.0)]
    length_penalty: f64,

    /// Inputs longer than this number of tokens are truncated
    #[arg(long, default_value_t = 512)]
    max_input_length: usize,

    /// Pad to the longest input of each batch instead of --max-input-length
    #[arg(long, default_value_t = false)]
    pad_to_longest: bool,

    /// Run on CPU even if CUDA is available
    #[arg(long, default_value_t = false)]
    cpu: bool,
}

impl Args {
    fn translation_config(&self) -> TranslationConfig {
        let device = if self.cpu {
            Device::Cpu
        } else {
            Device::cuda_if_available()
        };
        let mut config = match &self.model_dir {
            Some(model_dir) => TranslationConfig::new(
                LocalResource::from_model_dir(model_dir, "rust_model.ot"),
                LocalResource::from_model_dir(model_dir, "config.json"),
                LocalResource::from_model_dir(model_dir, "spiece.model"),
                self.source_language,
                self.target_language,
                device,
            ),
            None => {
                let (model, config, vocab) = match self.model {
                    PretrainedModel::T5Small => (
                        T5ModelResources::T5_SMALL,
                        T5ConfigResources::T5_SMALL,
                        T5VocabResources::T5_SMALL,
                    ),
                    PretrainedModel::T5Base => (
                        T5ModelResources::T5_BASE,
                        T5ConfigResources::T5_BASE,
                        T5VocabResources::T5_BASE,
                    ),
                };
                TranslationConfig::new(
                    RemoteResource::from_pretrained(model),
                    RemoteResource::from_pretrained(config),
                    RemoteResource::from_pretrained(vocab),
                    self.source_language,
                    self.target_language,
                    device,
                )
            }
        };
        config.max_length = self.max_length;
        config.num_beams = self.num_beams;
        config.length_penalty = self.length_penalty;
        config.max_input_length = self.max_input_length;
        config.pad_to_max_length = !self.pad_to_longest;
        config
    }
}

/// Reads the source lines, then loads the translator and writes the translations.
fn run<T, F>(args: &Args, load_translator: F) -> anyhow::Result<usize>
where
    T: BatchTranslator,
    F: FnOnce(&Args) -> anyhow::Result<T>,
{
    let lines = read_source_lines(&args.source_path)
        .with_context(|| format!("failed to read {}", args.source_path.display()))?;
    log::info!(
        "Read {} lines from {}",
        lines.len(),
        args.source_path.display()
    );

    let translator = load_translator(args)?;
    let written = write_translations(
        &translator,
        &lines,
        &args.output_path,
        args.batch_size as usize,
    )
    .with_context(|| format!("failed to write {}", args.output_path.display()))?;
    Ok(written)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    let args = Args::parse();

    let written = run(&args, |args| {
        let model = TranslationModel::new(args.translation_config())
            .context("failed to load the translation model")?;
        log::info!("Task prefix: `{}`", model.prefix());
        Ok(model)
    })?;
    log::info!(
        "Wrote {} translations to {}",
        written,
        args.output_path.display()
    );
    Ok(())
}
