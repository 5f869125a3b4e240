//! # llmshim-tokenizer
//!
//! Deterministic tokenization for the llmshim reference engine.
//!
//! This crate provides:
//! - A `Tokenizer` trait for pluggable tokenization backends
//! - [`VocabTokenizer`]: greedy longest-match over a fixed piece vocabulary
//! - Byte-fallback pieces (`<0x0A>` style) for characters the vocabulary lacks
//! - Special-token handling (BOS prefixing, literal special pieces)

use std::collections::HashMap;

/// Error type for tokenization operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizerError {
    #[error("Invalid token ID: {0}")]
    InvalidToken(i32),
    #[error("Encoding error: {0}")]
    EncodingError(String),
    #[error("Decoding error: {0}")]
    DecodingError(String),
    #[error("tokenization overflow")]
    Overflow,
    #[error("Invalid vocabulary: {0}")]
    InvalidVocab(String),
}

pub type TokenizerResult<T> = std::result::Result<T, TokenizerError>;

/// Upper bound on the number of tokens a single `encode` may return.
pub const MAX_TOKENS: usize = i32::MAX as usize;

/// Options controlling a single `encode` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Prepend the BOS token when the vocabulary defines one and asks for it.
    pub add_special: bool,
    /// Match special pieces (e.g. `</s>`) appearing literally in the text.
    pub parse_special: bool,
}

/// Core tokenizer trait. Implementations can be swapped without changing app code.
pub trait Tokenizer: Send + Sync {
    /// Encode text into a sequence of token IDs.
    fn encode(&self, text: &str, options: EncodeOptions) -> TokenizerResult<Vec<i32>>;

    /// Raw bytes of a single token.
    fn token_bytes(&self, token: i32) -> TokenizerResult<&[u8]>;

    /// UTF-8 text of a single token. Fails when the token's bytes are not
    /// valid UTF-8 on their own (a lone byte-fallback piece, for instance).
    fn token_to_piece(&self, token: i32) -> TokenizerResult<String> {
        let bytes = self.token_bytes(token)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| TokenizerError::DecodingError(format!("token {token}: {e}")))
    }

    /// Decode a complete sequence of tokens into text.
    ///
    /// Bytes are joined before UTF-8 validation, so multi-byte characters
    /// split across byte-fallback tokens decode correctly.
    fn decode(&self, tokens: &[i32]) -> TokenizerResult<String> {
        let mut bytes = Vec::new();
        for &token in tokens {
            bytes.extend_from_slice(self.token_bytes(token)?);
        }
        String::from_utf8(bytes).map_err(|e| TokenizerError::DecodingError(e.to_string()))
    }

    /// Get vocabulary size.
    fn vocab_size(&self) -> usize;
}

/// Parse a byte-fallback piece of the form `<0xNN>`.
fn parse_byte_piece(piece: &str) -> Option<u8> {
    let hex = piece.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

/// Greedy longest-match tokenizer over a fixed vocabulary.
///
/// - Deterministic: the same text always yields the same IDs
/// - Special pieces only match when `parse_special` is set
/// - Characters without a piece fall back to `<0xNN>` byte tokens, then to
///   the unknown token, and otherwise fail
#[derive(Debug, Clone)]
pub struct VocabTokenizer {
    /// Raw bytes for each token ID.
    bytes: Vec<Vec<u8>>,
    /// Text pieces eligible for ordinary matching.
    normal: HashMap<String, i32>,
    /// Special pieces, matched only with `parse_special`.
    special: HashMap<String, i32>,
    /// Byte-fallback token for each byte value, if present.
    byte_tokens: [Option<i32>; 256],
    /// Longest piece in bytes (bounds the match window).
    max_piece_len: usize,
    bos: Option<i32>,
    add_bos: bool,
    unk: Option<i32>,
}

impl VocabTokenizer {
    /// Build a tokenizer from pieces indexed by token ID.
    ///
    /// `special` lists IDs whose pieces are control markers rather than text.
    pub fn new(pieces: &[String], special: &[i32]) -> TokenizerResult<Self> {
        if pieces.is_empty() {
            return Err(TokenizerError::InvalidVocab("vocabulary is empty".to_string()));
        }
        if pieces.len() > MAX_TOKENS {
            return Err(TokenizerError::InvalidVocab("vocabulary too large".to_string()));
        }
        for &id in special {
            if id < 0 || id as usize >= pieces.len() {
                return Err(TokenizerError::InvalidVocab(format!(
                    "special token {id} outside vocabulary of {}",
                    pieces.len()
                )));
            }
        }

        let mut bytes = Vec::with_capacity(pieces.len());
        let mut normal = HashMap::new();
        let mut special_map = HashMap::new();
        let mut byte_tokens = [None; 256];
        let mut max_piece_len = 0;

        for (idx, piece) in pieces.iter().enumerate() {
            let id = idx as i32;
            if special.contains(&id) {
                bytes.push(piece.as_bytes().to_vec());
                if !piece.is_empty() {
                    special_map.entry(piece.clone()).or_insert(id);
                    max_piece_len = max_piece_len.max(piece.len());
                }
            } else if let Some(b) = parse_byte_piece(piece) {
                bytes.push(vec![b]);
                byte_tokens[b as usize].get_or_insert(id);
            } else {
                bytes.push(piece.as_bytes().to_vec());
                if !piece.is_empty() {
                    normal.entry(piece.clone()).or_insert(id);
                    max_piece_len = max_piece_len.max(piece.len());
                }
            }
        }

        Ok(Self {
            bytes,
            normal,
            special: special_map,
            byte_tokens,
            max_piece_len,
            bos: None,
            add_bos: false,
            unk: None,
        })
    }

    /// Set the BOS token and whether `add_special` encoding prepends it.
    pub fn with_bos(mut self, bos: i32, add_bos: bool) -> TokenizerResult<Self> {
        self.check_id(bos)?;
        self.bos = Some(bos);
        self.add_bos = add_bos;
        Ok(self)
    }

    /// Set the token emitted for characters with no piece and no byte fallback.
    pub fn with_unk(mut self, unk: i32) -> TokenizerResult<Self> {
        self.check_id(unk)?;
        self.unk = Some(unk);
        Ok(self)
    }

    pub fn bos(&self) -> Option<i32> {
        self.bos
    }

    fn check_id(&self, id: i32) -> TokenizerResult<()> {
        if id < 0 || id as usize >= self.bytes.len() {
            return Err(TokenizerError::InvalidToken(id));
        }
        Ok(())
    }

    /// Longest piece starting at byte offset `pos`, returning `(id, byte_len)`.
    fn longest_match(&self, text: &str, pos: usize, parse_special: bool) -> Option<(i32, usize)> {
        let remaining = text.len() - pos;
        let window = self.max_piece_len.min(remaining);
        for len in (1..=window).rev() {
            let end = pos + len;
            if !text.is_char_boundary(end) {
                continue;
            }
            let candidate = &text[pos..end];
            if parse_special {
                if let Some(&id) = self.special.get(candidate) {
                    return Some((id, len));
                }
            }
            if let Some(&id) = self.normal.get(candidate) {
                return Some((id, len));
            }
        }
        None
    }

    /// Byte-fallback tokens for one character, or `None` if any byte is missing.
    fn byte_fallback(&self, ch: char) -> Option<Vec<i32>> {
        let mut buf = [0u8; 4];
        ch.encode_utf8(&mut buf)
            .as_bytes()
            .iter()
            .map(|&b| self.byte_tokens[b as usize])
            .collect()
    }
}

impl Tokenizer for VocabTokenizer {
    fn encode(&self, text: &str, options: EncodeOptions) -> TokenizerResult<Vec<i32>> {
        let mut ids = Vec::new();
        if options.add_special && self.add_bos {
            if let Some(bos) = self.bos {
                ids.push(bos);
            }
        }

        let mut pos = 0;
        while pos < text.len() {
            if ids.len() >= MAX_TOKENS {
                return Err(TokenizerError::Overflow);
            }
            if let Some((id, len)) = self.longest_match(text, pos, options.parse_special) {
                ids.push(id);
                pos += len;
                continue;
            }

            // No piece starts here: fall back for exactly one character.
            let ch = text[pos..]
                .chars()
                .next()
                .ok_or_else(|| TokenizerError::EncodingError("split character".to_string()))?;
            if let Some(fallback) = self.byte_fallback(ch) {
                ids.extend(fallback);
            } else if let Some(unk) = self.unk {
                ids.push(unk);
            } else {
                return Err(TokenizerError::EncodingError(format!(
                    "no vocabulary entry for {ch:?}"
                )));
            }
            pos += ch.len_utf8();
        }

        Ok(ids)
    }

    fn token_bytes(&self, token: i32) -> TokenizerResult<&[u8]> {
        if token < 0 {
            return Err(TokenizerError::InvalidToken(token));
        }
        self.bytes
            .get(token as usize)
            .map(Vec::as_slice)
            .ok_or(TokenizerError::InvalidToken(token))
    }

    fn vocab_size(&self) -> usize {
        self.bytes.len()
    }
}
