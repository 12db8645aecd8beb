// Copyright 2019-present, the HuggingFace Inc. team, The Google AI Language Team and Facebook, Inc.
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

//! # Batch encoding for T5
//! Turns a batch of texts into padded token id and attention mask tensors using the
//! SentencePiece `T5Tokenizer`, and decodes generated token ids back into text.

use crate::common::error::TranslateError;
use rust_tokenizers::tokenizer::{T5Tokenizer, Tokenizer, TruncationStrategy};
use std::path::Path;
use tch::{Device, Tensor};

/// Token ids and attention mask for a batch of texts
pub struct EncodedBatch {
    /// Token ids of shape (*batch size*, *sequence_length*)
    pub input_ids: Tensor,
    /// Mask of shape (*batch size*, *sequence_length*), 1 for tokens and 0 for padding
    pub attention_mask: Tensor,
}

/// # T5 batch encoder
/// Tokenizes with truncation to `max_input_length`, then pads either to `max_input_length`
/// or to the longest sequence of the batch.
pub struct T5BatchEncoder {
    tokenizer: T5Tokenizer,
    max_input_length: usize,
    pad_to_max_length: bool,
    pad_token_id: i64,
}

impl T5BatchEncoder {
    pub fn new(
        tokenizer: T5Tokenizer,
        max_input_length: usize,
        pad_to_max_length: bool,
        pad_token_id: i64,
    ) -> T5BatchEncoder {
        T5BatchEncoder {
            tokenizer,
            max_input_length,
            pad_to_max_length,
            pad_token_id,
        }
    }

    /// Loads the SentencePiece model from `vocab_path`.
    pub fn from_file<P: AsRef<Path>>(
        vocab_path: P,
        max_input_length: usize,
        pad_to_max_length: bool,
        pad_token_id: i64,
    ) -> Result<T5BatchEncoder, TranslateError> {
        let tokenizer = T5Tokenizer::from_file(vocab_path.as_ref(), false)?;
        Ok(T5BatchEncoder::new(
            tokenizer,
            max_input_length,
            pad_to_max_length,
            pad_token_id,
        ))
    }

    /// Token ids for each text, truncated to `max_input_length` and terminated by EOS.
    pub fn tokenize<S: AsRef<str>>(&self, texts: &[S]) -> Vec<Vec<i64>> {
        self.tokenizer
            .encode_list(
                texts,
                self.max_input_length,
                &TruncationStrategy::LongestFirst,
                0,
            )
            .into_iter()
            .map(|tokenized_input| tokenized_input.token_ids)
            .collect()
    }

    /// Encodes a batch of texts into padded tensors placed on `device`.
    pub fn encode_batch<S: AsRef<str>>(&self, texts: &[S], device: Device) -> EncodedBatch {
        let target_length = if self.pad_to_max_length {
            Some(self.max_input_length)
        } else {
            None
        };
        let padded = pad_token_ids(self.tokenize(texts), target_length, self.pad_token_id);
        let shape = (padded.batch_size as i64, padded.sequence_length as i64);

        EncodedBatch {
            input_ids: Tensor::from_slice(&padded.token_ids)
                .view(shape)
                .to(device),
            attention_mask: Tensor::from_slice(&padded.attention_mask)
                .view(shape)
                .to(device),
        }
    }

    /// Decodes generated token ids, skipping special tokens without cleaning up tokenization spaces.
    pub fn decode(&self, token_ids: &[i64]) -> String {
        self.tokenizer.decode(token_ids, true, false)
    }

    pub fn decode_batch(&self, sequences: &[Vec<i64>]) -> Vec<String> {
        sequences
            .iter()
            .map(|token_ids| self.decode(token_ids))
            .collect()
    }
}

/// Row-major padded token ids and mask
#[derive(Debug, PartialEq)]
struct PaddedTokenIds {
    token_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    batch_size: usize,
    sequence_length: usize,
}

fn pad_token_ids(
    token_ids: Vec<Vec<i64>>,
    target_length: Option<usize>,
    pad_token_id: i64,
) -> PaddedTokenIds {
    let longest = token_ids.iter().map(Vec::len).max().unwrap_or(0);
    let sequence_length = target_length.unwrap_or(longest).max(longest);
    let batch_size = token_ids.len();

    let mut padded_ids = Vec::with_capacity(batch_size * sequence_length);
    let mut attention_mask = Vec::with_capacity(batch_size * sequence_length);
    for mut ids in token_ids {
        let padding = sequence_length - ids.len();
        attention_mask.extend(std::iter::repeat(1).take(ids.len()));
        attention_mask.extend(std::iter::repeat(0).take(padding));
        ids.extend(std::iter::repeat(pad_token_id).take(padding));
        padded_ids.extend(ids);
    }

    PaddedTokenIds {
        token_ids: padded_ids,
        attention_mask,
        batch_size,
        sequence_length,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pads_to_longest_sequence() {
        let padded = pad_token_ids(vec![vec![5, 6, 1], vec![7, 1]], None, 0);
        assert_eq!(padded.sequence_length, 3);
        assert_eq!(padded.batch_size, 2);
        assert_eq!(padded.token_ids, vec![5, 6, 1, 7, 1, 0]);
        assert_eq!(padded.attention_mask, vec![1, 1, 1, 1, 1, 0]);
    }

    #[test]
    fn pads_to_target_length() {
        let padded = pad_token_ids(vec![vec![5, 1]], Some(4), 0);
        assert_eq!(padded.sequence_length, 4);
        assert_eq!(padded.token_ids, vec![5, 1, 0, 0]);
        assert_eq!(padded.attention_mask, vec![1, 1, 0, 0]);
    }

    #[test]
    fn empty_batch() {
        let padded = pad_token_ids(vec![], None, 0);
        assert_eq!(padded.batch_size, 0);
        assert_eq!(padded.sequence_length, 0);
        assert!(padded.token_ids.is_empty());
    }
}
