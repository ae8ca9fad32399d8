//! Token-level truncation of embedding inputs.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tokenizers::Tokenizer;

use rulevault_shared::{Result, RuleVaultError};

/// Counts tokens and cuts text to a token budget.
pub trait TokenBudget: Send + Sync {
    fn count(&self, text: &str) -> Result<usize>;

    /// Keep at most `max_tokens` tokens of `text`, decoded back to text.
    fn truncate(&self, text: &str, max_tokens: usize) -> Result<String>;
}

/// HuggingFace tokenizer loaded from a `tokenizer.json`.
pub struct HfTokenizer {
    tokenizer: Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            RuleVaultError::EmbeddingModel(format!(
                "failed to load tokenizer {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self { tokenizer })
    }

    fn ids(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| RuleVaultError::Embedding(format!("tokenization failed: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }
}

impl TokenBudget for HfTokenizer {
    fn count(&self, text: &str) -> Result<usize> {
        Ok(self.ids(text)?.len())
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> Result<String> {
        let ids = self.ids(text)?;
        if ids.len() <= max_tokens {
            return Ok(text.to_string());
        }
        self.tokenizer
            .decode(&ids[..max_tokens], true)
            .map_err(|e| RuleVaultError::Embedding(format!("detokenization failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Estimate
// ---------------------------------------------------------------------------

/// Word runs and single punctuation marks, as BERT-style pre-tokenizers
/// split them.
static PIECE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+|[^\w\s]").expect("valid regex"));

/// Subword length assumed for long words.
const CHARS_PER_TOKEN: usize = 3;

fn piece_tokens(piece: &str) -> usize {
    piece.chars().count().div_ceil(CHARS_PER_TOKEN).max(1)
}

/// Token estimate used when no `tokenizer.json` is configured.
///
/// Every word run and punctuation mark costs at least one token, and long
/// words one token per three characters, so the estimate stays at or above
/// what a subword tokenizer produces for rules text. Truncation cuts the
/// original text after the last piece that fits.
#[derive(Debug, Default, Clone, Copy)]
pub struct EstimatedTokenizer;

impl TokenBudget for EstimatedTokenizer {
    fn count(&self, text: &str) -> Result<usize> {
        Ok(PIECE_RE
            .find_iter(text)
            .map(|m| piece_tokens(m.as_str()))
            .sum())
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> Result<String> {
        let mut used = 0;
        let mut end = 0;
        for piece in PIECE_RE.find_iter(text) {
            let cost = piece_tokens(piece.as_str());
            if used + cost > max_tokens {
                return Ok(text[..end].trim_end().to_string());
            }
            used += cost;
            end = piece.end();
        }
        Ok(text.to_string())
    }
}
