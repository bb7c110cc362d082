//! Character-level tokenizer for training the sequence model on plain text.

use std::collections::{BTreeSet, HashMap};

use crate::vqgen::error::{ModelError, Result};

/// Maps each character of a fixed alphabet to its position in that alphabet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteTokenizer {
    stoi: HashMap<char, i64>,
    itos: Vec<char>,
}

impl ByteTokenizer {
    /// Build from an ordered alphabet; a repeated character is a config error.
    pub fn new<I: IntoIterator<Item = char>>(alphabet: I) -> Result<Self> {
        let mut stoi = HashMap::new();
        let mut itos = Vec::new();
        for ch in alphabet {
            if stoi.insert(ch, itos.len() as i64).is_some() {
                return Err(ModelError::config(format!(
                    "character {:?} appears twice in the alphabet",
                    ch
                )));
            }
            itos.push(ch);
        }
        if itos.is_empty() {
            return Err(ModelError::config("alphabet is empty"));
        }

        Ok(Self { stoi, itos })
    }

    /// Alphabet of the sorted distinct characters of `corpus`.
    pub fn from_corpus(corpus: &str) -> Result<Self> {
        let chars: BTreeSet<char> = corpus.chars().collect();
        Self::new(chars)
    }

    pub fn vocab_size(&self) -> usize {
        self.itos.len()
    }

    pub fn encode(&self, text: &str) -> Result<Vec<i64>> {
        text.chars()
            .map(|ch| self.stoi.get(&ch).copied().ok_or(ModelError::UnknownSymbol(ch)))
            .collect()
    }

    pub fn decode(&self, ids: &[i64]) -> Result<String> {
        ids.iter()
            .map(|&id| {
                usize::try_from(id)
                    .ok()
                    .and_then(|i| self.itos.get(i).copied())
                    .ok_or(ModelError::IndexOutOfRange {
                        context: "tokenizer ids",
                        index: id,
                        bound: self.itos.len(),
                    })
            })
            .collect()
    }
}
