use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::SolverError;

pub const START_TOKEN: &str = "<START>";
pub const NULL_TOKEN: &str = "<NULL>";
pub const END_TOKEN: &str = "<END>";

/// Bijective word/id mapping supplied by the dataset pipeline.
///
/// The three reserved control tokens must be present; their absence is a
/// construction-time config error. `<NULL>` is the padding id ignored by the
/// loss, `<START>` seeds decoding, `<END>` terminates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    word_to_idx: HashMap<String, u32>,
    idx_to_word: HashMap<u32, String>,
    start: u32,
    null: u32,
    end: u32,
}

impl Vocabulary {
    pub fn new(word_to_idx: HashMap<String, u32>) -> Result<Self> {
        let reserved = |token: &str| -> Result<u32> {
            word_to_idx.get(token).copied().ok_or_else(|| {
                SolverError::Config(format!("vocabulary is missing reserved token {}", token))
                    .into()
            })
        };
        let start = reserved(START_TOKEN)?;
        let null = reserved(NULL_TOKEN)?;
        let end = reserved(END_TOKEN)?;

        let idx_to_word = word_to_idx
            .iter()
            .map(|(w, i)| (*i, w.clone()))
            .collect::<HashMap<_, _>>();
        if idx_to_word.len() != word_to_idx.len() {
            return Err(
                SolverError::Config("vocabulary mapping is not bijective".to_string()).into(),
            );
        }

        Ok(Self {
            word_to_idx,
            idx_to_word,
            start,
            null,
            end,
        })
    }

    /// Load a `{word: id}` JSON map, e.g. the dataset's `word_to_idx.json`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let map: HashMap<String, u32> = serde_json::from_reader(std::io::BufReader::new(file))?;
        Self::new(map)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn null(&self) -> u32 {
        self.null
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn len(&self) -> usize {
        self.word_to_idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word_to_idx.is_empty()
    }

    pub fn id(&self, word: &str) -> Option<u32> {
        self.word_to_idx.get(word).copied()
    }

    /// Render one generated id sequence as text: stop at the first `<END>`,
    /// skip `<NULL>` and `<START>`, join words with single spaces.
    pub fn decode_caption(&self, ids: &[u32]) -> String {
        let mut words = Vec::new();
        for &id in ids {
            if id == self.end {
                break;
            }
            if id == self.null || id == self.start {
                continue;
            }
            match self.idx_to_word.get(&id) {
                Some(word) => words.push(word.as_str()),
                None => tracing::warn!("decode: id {} not in vocabulary, skipping", id),
            }
        }
        words.join(" ")
    }

    pub fn decode_captions(&self, sequences: &[Vec<u32>]) -> Vec<String> {
        sequences.iter().map(|s| self.decode_caption(s)).collect()
    }
}
