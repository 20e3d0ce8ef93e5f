//! Fixed-width encoding of raw text into token ids and attention masks.
//!
//! [`TextEncoder`] wraps a pretrained `tokenizers` tokenizer. Each text is
//! encoded with its marker tokens, padded on the right and then cut on the
//! right to exactly `max_len` positions, so an over-long text loses its
//! trailing `[SEP]`. Encoded rows
//! are stored contiguously in an [`EncodedDataset`] and batches borrow
//! slices of the same buffers.

use std::{num::NonZeroUsize, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokenizers::{PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer};

/// How the attention mask is derived for each encoded row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskPolicy {
    /// Mark the positions the tokenizer reports as real tokens.
    #[default]
    SequenceLength,
    /// Mark every position whose token id is nonzero.
    ///
    /// Reproduces predictions made by pipelines that inferred padding from
    /// the id value. A genuine token with id `0` is masked out.
    NonZeroTokenId,
}

/// Tokenizer settings applied on top of the pretrained vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncoderConfig {
    /// Width of every encoded row.
    pub max_len: usize,
    /// Identifier written into padded positions.
    pub pad_id: u32,
    /// Token string matching `pad_id`.
    pub pad_token: String,
    /// Attention mask derivation.
    pub mask_policy: MaskPolicy,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            max_len: 200,
            pad_id: 0,
            pad_token: "[PAD]".into(),
            mask_policy: MaskPolicy::default(),
        }
    }
}

/// Errors produced while configuring the tokenizer or encoding text.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("failed to load tokenizer from {path}: {source}")]
    LoadTokenizer {
        path: std::path::PathBuf,
        #[source]
        source: tokenizers::Error,
    },
    #[error("failed to disable tokenizer truncation: {0}")]
    ConfigureTruncation(#[source] tokenizers::Error),
    #[error("encoder requires max_len > 0")]
    ZeroSequenceLength,
    #[error("failed to encode text: {0}")]
    Encode(#[source] tokenizers::Error),
    #[error("tokenizer produced sequence of length {actual} but expected at least {expected}")]
    SequenceLength { expected: usize, actual: usize },
}

/// One fixed-width encoded text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedExample {
    /// Token ids, right-padded to `max_len`.
    pub token_ids: Vec<i64>,
    /// `1` for attended positions, `0` otherwise.
    pub attention_mask: Vec<i64>,
    /// Number of real (non-padding) tokens kept after the cut, markers
    /// included.
    pub length: usize,
}

/// Sub-word view of a single text, without padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSample {
    pub tokens: Vec<String>,
    pub ids: Vec<u32>,
}

/// Row-major token id and mask matrices for a whole test set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedDataset {
    token_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    max_len: usize,
    rows: usize,
}

impl EncodedDataset {
    fn with_capacity(rows: usize, max_len: usize) -> Self {
        Self {
            token_ids: Vec::with_capacity(rows.saturating_mul(max_len)),
            attention_mask: Vec::with_capacity(rows.saturating_mul(max_len)),
            max_len,
            rows: 0,
        }
    }

    fn push(&mut self, example: EncodedExample) {
        self.token_ids.extend(example.token_ids);
        self.attention_mask.extend(example.attention_mask);
        self.rows += 1;
    }

    /// Number of encoded rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Width of every row.
    #[must_use]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Returns the token ids and mask of row `index`.
    #[must_use]
    pub fn row(&self, index: usize) -> Option<(&[i64], &[i64])> {
        let start = index.checked_mul(self.max_len)?;
        let end = start.checked_add(self.max_len)?;
        Some((
            self.token_ids.get(start..end)?,
            self.attention_mask.get(start..end)?,
        ))
    }

    /// Splits the dataset into sequential batches of at most `batch_size`
    /// rows. Order is preserved and only the last batch may be shorter.
    pub fn batches(&self, batch_size: NonZeroUsize) -> impl Iterator<Item = EncodedBatch<'_>> {
        let chunk = batch_size.get().saturating_mul(self.max_len).max(1);
        let max_len = self.max_len;
        self.token_ids
            .chunks(chunk)
            .zip(self.attention_mask.chunks(chunk))
            .map(move |(token_ids, attention_mask)| EncodedBatch {
                token_ids,
                attention_mask,
                rows: token_ids.len() / max_len,
                max_len,
            })
    }
}

/// Contiguous slice of rows from an [`EncodedDataset`].
#[derive(Debug, Clone, Copy)]
pub struct EncodedBatch<'a> {
    token_ids: &'a [i64],
    attention_mask: &'a [i64],
    rows: usize,
    max_len: usize,
}

impl<'a> EncodedBatch<'a> {
    /// Row-major `[rows, max_len]` token ids.
    #[must_use]
    pub fn token_ids(&self) -> &'a [i64] {
        self.token_ids
    }

    /// Row-major `[rows, max_len]` attention mask.
    #[must_use]
    pub fn attention_mask(&self) -> &'a [i64] {
        self.attention_mask
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

/// Pretrained tokenizer configured for fixed-width, right-side padding.
#[derive(Debug, Clone)]
pub struct TextEncoder {
    tokenizer: Tokenizer,
    max_len: usize,
    mask_policy: MaskPolicy,
}

impl TextEncoder {
    /// Loads a `tokenizer.json` file and configures it for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::LoadTokenizer`] when the file cannot be read
    /// or parsed, and the errors of [`TextEncoder::from_tokenizer`].
    pub fn from_file(path: &Path, config: &EncoderConfig) -> Result<Self, EncodingError> {
        let tokenizer =
            Tokenizer::from_file(path).map_err(|source| EncodingError::LoadTokenizer {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_tokenizer(tokenizer, config)
    }

    /// Configures an already loaded tokenizer.
    ///
    /// Any truncation stored in the tokenizer definition is switched off;
    /// [`TextEncoder::encode`] cuts rows itself once the markers are in place.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::ZeroSequenceLength`] for `max_len == 0` and
    /// [`EncodingError::ConfigureTruncation`] when the tokenizer refuses to
    /// drop its truncation settings.
    pub fn from_tokenizer(
        mut tokenizer: Tokenizer,
        config: &EncoderConfig,
    ) -> Result<Self, EncodingError> {
        if config.max_len == 0 {
            return Err(EncodingError::ZeroSequenceLength);
        }

        tokenizer
            .with_truncation(None)
            .map_err(EncodingError::ConfigureTruncation)?;

        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(config.max_len),
            direction: PaddingDirection::Right,
            pad_to_multiple_of: None,
            pad_id: config.pad_id,
            pad_type_id: 0,
            pad_token: config.pad_token.clone(),
        }));

        Ok(Self {
            tokenizer,
            max_len: config.max_len,
            mask_policy: config.mask_policy,
        })
    }

    #[must_use]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Encodes one text into a row of exactly `max_len` positions.
    ///
    /// Marker tokens are added first and the padded sequence is then cut on
    /// the right, matching post-truncation of a pre-built id sequence.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::Encode`] when the tokenizer fails and
    /// [`EncodingError::SequenceLength`] if the padded output is shorter than
    /// `max_len`.
    pub fn encode(&self, text: &str) -> Result<EncodedExample, EncodingError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(EncodingError::Encode)?;
        let all_ids = encoding.get_ids();
        let all_real = encoding.get_attention_mask();
        let (Some(ids), Some(real)) = (all_ids.get(..self.max_len), all_real.get(..self.max_len))
        else {
            return Err(EncodingError::SequenceLength {
                expected: self.max_len,
                actual: all_ids.len().min(all_real.len()),
            });
        };

        let token_ids: Vec<i64> = ids.iter().map(|id| i64::from(*id)).collect();
        let attention_mask: Vec<i64> = match self.mask_policy {
            MaskPolicy::SequenceLength => real.iter().map(|m| i64::from(*m)).collect(),
            MaskPolicy::NonZeroTokenId => ids.iter().map(|id| i64::from(*id != 0)).collect(),
        };
        let length = real.iter().filter(|m| **m != 0).count();

        Ok(EncodedExample {
            token_ids,
            attention_mask,
            length,
        })
    }

    /// Encodes every text in order.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by [`TextEncoder::encode`].
    pub fn encode_all<'t, I>(&self, texts: I) -> Result<EncodedDataset, EncodingError>
    where
        I: IntoIterator<Item = &'t str>,
        I::IntoIter: ExactSizeIterator,
    {
        let texts = texts.into_iter();
        let mut dataset = EncodedDataset::with_capacity(texts.len(), self.max_len);
        for text in texts {
            dataset.push(self.encode(text)?);
        }
        Ok(dataset)
    }

    /// Returns the real tokens of `text` (markers included, padding dropped).
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::Encode`] when the tokenizer fails.
    pub fn describe(&self, text: &str) -> Result<TokenSample, EncodingError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(EncodingError::Encode)?;
        let (tokens, ids) = encoding
            .get_tokens()
            .iter()
            .zip(encoding.get_ids())
            .zip(encoding.get_attention_mask())
            .filter(|(_, mask)| **mask != 0)
            .map(|((token, id), _)| (token.clone(), *id))
            .unzip();
        Ok(TokenSample { tokens, ids })
    }
}
