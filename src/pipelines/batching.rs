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

//! # Batch translation of text files
//! Splits the input lines into contiguous batches, translates each batch and writes one
//! hypothesis per input line, flushing the output after every line.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use t5_translate::pipelines::batching::translate_file;
//! use t5_translate::pipelines::translation::{TranslationConfig, TranslationModel};
//!
//! let model = TranslationModel::new(TranslationConfig::default())?;
//! let written = translate_file(&model, "newstest2014.en", "hypotheses.de", 16)?;
//! # Ok(())
//! # }
//! ```

use crate::common::error::TranslateError;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::slice::Chunks;

/// # Batch translation seam
/// Anything able to translate a batch of lines, one output per input, in order.
pub trait BatchTranslator {
    fn translate_batch(&self, lines: &[String]) -> Result<Vec<String>, TranslateError>;
}

fn check_batch_size(batch_size: usize) -> Result<(), TranslateError> {
    if batch_size == 0 {
        return Err(TranslateError::InvalidConfigurationError(
            "batch size must be strictly greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Splits `items` into contiguous slices of `batch_size` items, the last one possibly shorter.
pub fn chunks<T>(items: &[T], batch_size: usize) -> Result<Chunks<'_, T>, TranslateError> {
    check_batch_size(batch_size)?;
    Ok(items.chunks(batch_size))
}

/// Input line as fed to the model: trailing whitespace removed, one leading space added.
pub fn normalize_line(line: &str) -> String {
    format!(" {}", line.trim_end())
}

/// Reads and normalizes every line of `path`.
pub fn read_source_lines<P: AsRef<Path>>(path: P) -> Result<Vec<String>, TranslateError> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    reader
        .lines()
        .map(|line| Ok(normalize_line(&line?)))
        .collect()
}

/// Translates `lines` batch by batch and writes each hypothesis followed by a newline,
/// flushing after every line.
///
/// # Arguments
///
/// * `translator` - `BatchTranslator` used for every batch
/// * `lines` - Normalized input lines
/// * `batch_size` - Maximum number of lines per batch, strictly positive
/// * `output` - Destination of the hypotheses
///
/// # Returns
///
/// * Number of lines written
pub fn translate_lines<T, W>(
    translator: &T,
    lines: &[String],
    batch_size: usize,
    output: &mut W,
) -> Result<usize, TranslateError>
where
    T: BatchTranslator + ?Sized,
    W: Write,
{
    let batches = chunks(lines, batch_size)?;
    let num_batches = lines.len().div_ceil(batch_size);
    let mut written = 0;

    for (batch_index, batch) in batches.enumerate() {
        log::info!(
            "batch {}/{} ({} lines)",
            batch_index + 1,
            num_batches,
            batch.len()
        );
        let translations = translator.translate_batch(batch)?;
        if translations.len() != batch.len() {
            return Err(TranslateError::ValueError(format!(
                "Translator returned {} lines for a batch of {}",
                translations.len(),
                batch.len()
            )));
        }
        for hypothesis in translations {
            writeln!(output, "{}", hypothesis)?;
            output.flush()?;
            written += 1;
        }
    }
    log::debug!("{} lines translated", written);
    Ok(written)
}

/// Translates already read `lines` and overwrites `output_path` with one line per input.
/// The output file is only created once the batch size was checked.
pub fn write_translations<T, Q>(
    translator: &T,
    lines: &[String],
    output_path: Q,
    batch_size: usize,
) -> Result<usize, TranslateError>
where
    T: BatchTranslator + ?Sized,
    Q: AsRef<Path>,
{
    check_batch_size(batch_size)?;
    let mut output = BufWriter::new(File::create(output_path.as_ref())?);
    translate_lines(translator, lines, batch_size, &mut output)
}

/// Reads `source_path`, translates it and overwrites `output_path` with one line per input.
pub fn translate_file<T, P, Q>(
    translator: &T,
    source_path: P,
    output_path: Q,
    batch_size: usize,
) -> Result<usize, TranslateError>
where
    T: BatchTranslator + ?Sized,
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    check_batch_size(batch_size)?;
    let lines = read_source_lines(source_path.as_ref())?;
    log::info!(
        "Translating {} lines from {}",
        lines.len(),
        source_path.as_ref().display()
    );
    write_translations(translator, &lines, output_path, batch_size)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::Cell;

    struct Uppercase {
        calls: Cell<usize>,
    }

    impl BatchTranslator for Uppercase {
        fn translate_batch(&self, lines: &[String]) -> Result<Vec<String>, TranslateError> {
            self.calls.set(self.calls.get() + 1);
            Ok(lines.iter().map(|line| line.trim().to_uppercase()).collect())
        }
    }

    struct DropsFirstLine;

    impl BatchTranslator for DropsFirstLine {
        fn translate_batch(&self, lines: &[String]) -> Result<Vec<String>, TranslateError> {
            Ok(lines.iter().skip(1).cloned().collect())
        }
    }

    #[derive(Default)]
    struct CountingWriter {
        buffer: Vec<u8>,
        flushes: usize,
    }

    impl Write for CountingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    fn lines(count: usize) -> Vec<String> {
        (0..count).map(|index| format!(" line {}", index)).collect()
    }

    #[test]
    fn chunks_partition_input_in_order() {
        for length in 0..20usize {
            let items = (0..length).collect::<Vec<usize>>();
            for batch_size in 1..8usize {
                let batches = chunks(&items, batch_size).unwrap().collect::<Vec<&[usize]>>();
                assert_eq!(batches.len(), length.div_ceil(batch_size));
                assert_eq!(batches.concat(), items);
                if let Some((last, full)) = batches.split_last() {
                    assert!(full.iter().all(|batch| batch.len() == batch_size));
                    let expected_last = match length % batch_size {
                        0 => batch_size,
                        remainder => remainder,
                    };
                    assert_eq!(last.len(), expected_last);
                }
            }
        }
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(matches!(
            chunks(&[1, 2, 3], 0),
            Err(TranslateError::InvalidConfigurationError(_))
        ));
    }

    #[test]
    fn normalize_line_adds_single_leading_space() {
        assert_eq!(normalize_line("Hello world  \r"), " Hello world");
        assert_eq!(normalize_line(""), " ");
        assert_eq!(normalize_line("  indented"), "   indented");
    }

    #[test]
    fn translate_lines_writes_and_flushes_each_line() {
        let translator = Uppercase {
            calls: Cell::new(0),
        };
        let mut output = CountingWriter::default();
        let written = translate_lines(&translator, &lines(5), 2, &mut output).unwrap();

        assert_eq!(written, 5);
        assert_eq!(translator.calls.get(), 3);
        assert_eq!(output.flushes, 5);
        assert_eq!(
            String::from_utf8(output.buffer).unwrap(),
            "LINE 0\nLINE 1\nLINE 2\nLINE 3\nLINE 4\n"
        );
    }

    #[test]
    fn batch_larger_than_input_is_a_single_call() {
        let translator = Uppercase {
            calls: Cell::new(0),
        };
        let mut output: Vec<u8> = Vec::new();
        let written = translate_lines(&translator, &lines(3), 16, &mut output).unwrap();
        assert_eq!(written, 3);
        assert_eq!(translator.calls.get(), 1);
    }

    #[test]
    fn empty_input_writes_nothing() {
        let translator = Uppercase {
            calls: Cell::new(0),
        };
        let mut output: Vec<u8> = Vec::new();
        let written = translate_lines(&translator, &[], 4, &mut output).unwrap();
        assert_eq!(written, 0);
        assert_eq!(translator.calls.get(), 0);
        assert!(output.is_empty());
    }

    #[test]
    fn line_count_mismatch_is_an_error() {
        let mut output: Vec<u8> = Vec::new();
        let result = translate_lines(&DropsFirstLine, &lines(4), 2, &mut output);
        assert!(matches!(result, Err(TranslateError::ValueError(_))));
        assert!(output.is_empty());
    }
}
