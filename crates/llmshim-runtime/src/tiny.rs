//! Tiny reference engine.
//!
//! A deterministic, single-layer, single-head transformer that implements the
//! [`EngineModel`] / [`EngineContext`] contract entirely on the CPU. Weights
//! are not stored on disk: a JSON model file describes the vocabulary and
//! shape, and every matrix is expanded from the file's seed at load time.
//!
//! Forward pass per position:
//! 1. `x = embed[token]`
//! 2. `q = Wq·x`, `k = Wk·x`, `v = Wv·x`, RoPE applied to `q` and `k`
//! 3. `(k, v)` appended to the KV cache; `h = x + attn(q, cache)`
//! 4. encoder–decoder models add cross-attention over the encoder state
//! 5. `logits = lm_head·h` (last position only)

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use llmshim_engine::{
    ContextParams, EngineContext, EngineError, EngineModel, ModelParams, Result, TokenId,
};
use llmshim_sampling::SeededRng;
use llmshim_tokenizer::{EncodeOptions, Tokenizer, TokenizerError, VocabTokenizer};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::kv::KvCache;

/// Largest context a [`TinyContext`] will allocate, in positions.
pub const MAX_CONTEXT: u32 = 1 << 20;

/// Largest hidden size a model file may declare.
pub const MAX_D_MODEL: usize = 4096;

/// Upper bound on the elements of any one weight or cache buffer.
const MAX_BUFFER_ELEMENTS: usize = 1 << 26;

const ROPE_BASE: f32 = 10_000.0;

/// Model family described by a model file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    #[default]
    Decoder,
    EncoderDecoder,
}

/// On-disk model description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TinyModelFile {
    #[serde(default)]
    pub architecture: Architecture,
    /// Training context length. Non-positive means "unknown".
    #[serde(default)]
    pub n_ctx_train: i32,
    #[serde(default = "default_d_model")]
    pub d_model: usize,
    /// Seed the weight matrices are expanded from.
    #[serde(default)]
    pub seed: u64,
    /// Token pieces, indexed by token ID.
    pub vocab: Vec<String>,
    #[serde(default)]
    pub bos_token: Option<TokenId>,
    #[serde(default)]
    pub eos_tokens: Vec<TokenId>,
    #[serde(default)]
    pub unk_token: Option<TokenId>,
    #[serde(default)]
    pub decoder_start_token: Option<TokenId>,
    #[serde(default = "default_add_bos")]
    pub add_bos: bool,
}

fn default_d_model() -> usize {
    16
}

fn default_add_bos() -> bool {
    true
}

impl TinyModelFile {
    pub fn new(vocab: Vec<String>) -> Self {
        Self {
            architecture: Architecture::Decoder,
            n_ctx_train: 0,
            d_model: default_d_model(),
            seed: 0,
            vocab,
            bos_token: None,
            eos_tokens: Vec::new(),
            unk_token: None,
            decoder_start_token: None,
            add_bos: default_add_bos(),
        }
    }

    /// Small English vocabulary with `<unk>`, `<s>` and `</s>` at IDs 0, 1, 2.
    pub fn demo() -> Self {
        let pieces = [
            "<unk>", "<s>", "</s>", " ", "Hello", "world", "the", "a", "cat", "sat", "on", "mat",
            ".", ",", "!", "?", "H", "e", "l", "o", "w", "r", "d", "t", "h", "s", "n", "m", "c",
        ];
        Self::new(pieces.iter().map(|p| p.to_string()).collect())
            .with_n_ctx_train(2048)
            .with_seed(7)
            .with_bos(1)
            .with_eos(vec![2])
            .with_unk(0)
    }

    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn with_n_ctx_train(mut self, n_ctx_train: i32) -> Self {
        self.n_ctx_train = n_ctx_train;
        self
    }

    pub fn with_d_model(mut self, d_model: usize) -> Self {
        self.d_model = d_model;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_bos(mut self, bos: TokenId) -> Self {
        self.bos_token = Some(bos);
        self
    }

    pub fn with_eos(mut self, eos: Vec<TokenId>) -> Self {
        self.eos_tokens = eos;
        self
    }

    pub fn with_unk(mut self, unk: TokenId) -> Self {
        self.unk_token = Some(unk);
        self
    }

    pub fn with_decoder_start(mut self, token: TokenId) -> Self {
        self.decoder_start_token = Some(token);
        self
    }

    pub fn with_add_bos(mut self, add_bos: bool) -> Self {
        self.add_bos = add_bos;
        self
    }

    /// Write the description as JSON.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)
    }

    /// Every special token ID the file references.
    fn special_ids(&self) -> Vec<TokenId> {
        let mut ids: Vec<TokenId> = self
            .bos_token
            .into_iter()
            .chain(self.unk_token)
            .chain(self.eos_tokens.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Dense weights expanded from the model seed.
#[derive(Debug)]
struct Weights {
    d_model: usize,
    n_vocab: usize,
    /// [n_vocab, d_model]
    embed: Vec<f32>,
    /// [d_model, d_model] each
    wq: Vec<f32>,
    wk: Vec<f32>,
    wv: Vec<f32>,
    /// [n_vocab, d_model]
    lm_head: Vec<f32>,
    /// 1 / base^(2i/d) for i in 0..d/2
    inv_freq: Vec<f32>,
}

impl Weights {
    fn generate(seed: u64, n_vocab: usize, d_model: usize) -> Self {
        let mut rng = SeededRng::new(seed);
        let scale = 1.0 / (d_model as f32).sqrt();
        let mut matrix = |rows: usize, s: f32| -> Vec<f32> {
            (0..rows * d_model)
                .map(|_| (rng.next_f32() * 2.0 - 1.0) * s)
                .collect()
        };

        let embed = matrix(n_vocab, 1.0);
        let wq = matrix(d_model, scale);
        let wk = matrix(d_model, scale);
        let wv = matrix(d_model, scale);
        let lm_head = matrix(n_vocab, scale * 4.0);
        let inv_freq = (0..d_model / 2)
            .map(|i| 1.0 / ROPE_BASE.powf(2.0 * i as f32 / d_model as f32))
            .collect();

        Self {
            d_model,
            n_vocab,
            embed,
            wq,
            wk,
            wv,
            lm_head,
            inv_freq,
        }
    }

    fn embedding(&self, token: TokenId) -> &[f32] {
        let row = token as usize;
        &self.embed[row * self.d_model..(row + 1) * self.d_model]
    }

    fn project(&self, w: &[f32], x: &[f32]) -> Vec<f32> {
        w.chunks_exact(self.d_model).map(|row| dot(row, x)).collect()
    }

    /// Rotate consecutive pairs of `x` by position-dependent angles.
    fn rope(&self, x: &mut [f32], pos: usize) {
        for (i, &freq) in self.inv_freq.iter().enumerate() {
            let angle = pos as f32 * freq;
            let (sin, cos) = angle.sin_cos();
            let (x0, x1) = (x[2 * i], x[2 * i + 1]);
            x[2 * i] = x0 * cos - x1 * sin;
            x[2 * i + 1] = x0 * sin + x1 * cos;
        }
    }

    fn logits(&self, hidden: &[f32]) -> Vec<f32> {
        self.project(&self.lm_head, hidden)
    }
}

/// `rows * cols` when it fits under [`MAX_BUFFER_ELEMENTS`].
fn buffer_len(rows: usize, cols: usize) -> Option<usize> {
    rows.checked_mul(cols)
        .filter(|&n| n <= MAX_BUFFER_ELEMENTS)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scaled dot-product attention of `q` over every position in `cache`.
fn attend(q: &[f32], cache: &KvCache) -> Vec<f32> {
    let mut out = vec![0.0; q.len()];
    let n = cache.seq_len();
    if n == 0 {
        return out;
    }

    let scale = 1.0 / (q.len() as f32).sqrt();
    let scores: Vec<f32> = (0..n).map(|j| dot(q, cache.key(j)) * scale).collect();
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exp.iter().sum();

    for (j, w) in exp.iter().enumerate() {
        let weight = w / total;
        for (o, v) in out.iter_mut().zip(cache.value(j)) {
            *o += weight * v;
        }
    }
    out
}

/// A loaded tiny model.
#[derive(Debug, Clone)]
pub struct TinyModel {
    architecture: Architecture,
    n_ctx_train: i32,
    bos: Option<TokenId>,
    eos: Vec<TokenId>,
    decoder_start: Option<TokenId>,
    weights: Arc<Weights>,
    tokenizer: Arc<VocabTokenizer>,
}

impl TinyModel {
    /// Build a model from an in-memory description.
    pub fn from_file(file: TinyModelFile) -> Result<Self> {
        let n_vocab = file.vocab.len();
        if file.d_model == 0 || file.d_model % 2 != 0 {
            return Err(EngineError::ModelLoad(format!(
                "d_model must be positive and even, got {}",
                file.d_model
            )));
        }
        if file.d_model > MAX_D_MODEL {
            return Err(EngineError::ModelLoad(format!(
                "d_model {} exceeds limit {MAX_D_MODEL}",
                file.d_model
            )));
        }
        buffer_len(n_vocab, file.d_model).ok_or_else(|| {
            EngineError::ModelLoad(format!(
                "{n_vocab} x {} weight matrix exceeds limit {MAX_BUFFER_ELEMENTS}",
                file.d_model
            ))
        })?;
        let in_vocab = |id: TokenId| id >= 0 && (id as usize) < n_vocab;
        if let Some(id) = file
            .decoder_start_token
            .into_iter()
            .chain(file.eos_tokens.iter().copied())
            .find(|&id| !in_vocab(id))
        {
            return Err(EngineError::ModelLoad(format!(
                "token {id} outside vocabulary of {n_vocab}"
            )));
        }

        let mut tokenizer =
            VocabTokenizer::new(&file.vocab, &file.special_ids()).map_err(load_error)?;
        if let Some(bos) = file.bos_token {
            tokenizer = tokenizer.with_bos(bos, file.add_bos).map_err(load_error)?;
        }
        if let Some(unk) = file.unk_token {
            tokenizer = tokenizer.with_unk(unk).map_err(load_error)?;
        }

        Ok(Self {
            architecture: file.architecture,
            n_ctx_train: file.n_ctx_train,
            bos: file.bos_token,
            eos: file.eos_tokens,
            decoder_start: file.decoder_start_token,
            weights: Arc::new(Weights::generate(file.seed, n_vocab, file.d_model)),
            tokenizer: Arc::new(tokenizer),
        })
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn d_model(&self) -> usize {
        self.weights.d_model
    }
}

fn load_error(e: TokenizerError) -> EngineError {
    EngineError::ModelLoad(e.to_string())
}

fn read_model_file(path: &Path, use_mmap: bool) -> Result<TinyModelFile> {
    let parse_error =
        |e: serde_json::Error| EngineError::ModelLoad(format!("{}: {e}", path.display()));
    let io_error = |e: std::io::Error| EngineError::ModelLoad(format!("{}: {e}", path.display()));

    if use_mmap {
        let file = File::open(path).map_err(io_error)?;
        // SAFETY: the mapping is read-only and dropped before this function
        // returns; the parsed description owns all of its data.
        let map = unsafe { Mmap::map(&file) }.map_err(io_error)?;
        serde_json::from_slice(&map).map_err(parse_error)
    } else {
        let bytes = std::fs::read(path).map_err(io_error)?;
        serde_json::from_slice(&bytes).map_err(parse_error)
    }
}

impl EngineModel for TinyModel {
    type Context = TinyContext;

    fn load(path: &Path, params: &ModelParams) -> Result<Self> {
        if params.gpu_layers > 0 {
            tracing::warn!(
                gpu_layers = params.gpu_layers,
                "reference engine runs on CPU only; ignoring GPU offload"
            );
        }
        if params.use_mlock {
            tracing::debug!("mlock requested; reference weights are heap allocated");
        }

        let file = read_model_file(path, params.use_mmap)?;
        let model = Self::from_file(file)?;
        tracing::info!(
            path = %path.display(),
            n_vocab = model.n_vocab(),
            d_model = model.d_model(),
            architecture = ?model.architecture,
            "model loaded"
        );
        Ok(model)
    }

    fn n_ctx_train(&self) -> i32 {
        self.n_ctx_train
    }

    fn n_vocab(&self) -> usize {
        self.weights.n_vocab
    }

    fn has_encoder(&self) -> bool {
        self.architecture == Architecture::EncoderDecoder
    }

    fn decoder_start_token(&self) -> Option<TokenId> {
        self.decoder_start
    }

    /// BOS, or -1 when the vocabulary defines none.
    fn token_bos(&self) -> TokenId {
        self.bos.unwrap_or(-1)
    }

    fn tokenize(&self, text: &str, add_special: bool, parse_special: bool) -> Result<Vec<TokenId>> {
        self.tokenizer
            .encode(
                text,
                EncodeOptions {
                    add_special,
                    parse_special,
                },
            )
            .map_err(|e| match e {
                TokenizerError::Overflow => EngineError::TokenOverflow,
                other => EngineError::Tokenization(other.to_string()),
            })
    }

    fn token_to_piece(&self, token: TokenId) -> Result<String> {
        self.tokenizer
            .token_to_piece(token)
            .map_err(|e| EngineError::TokenPiece {
                token,
                reason: e.to_string(),
            })
    }

    fn is_eog(&self, token: TokenId) -> bool {
        self.eos.contains(&token)
    }

    fn new_context(&self, params: &ContextParams) -> Result<TinyContext> {
        if params.n_ctx == 0 {
            return Err(EngineError::ContextInit(
                "context length must be positive".to_string(),
            ));
        }
        if params.n_ctx > MAX_CONTEXT {
            return Err(EngineError::ContextInit(format!(
                "context length {} exceeds limit {MAX_CONTEXT}",
                params.n_ctx
            )));
        }
        if params.n_batch == 0 {
            return Err(EngineError::ContextInit(
                "batch size must be positive".to_string(),
            ));
        }

        let n_batch = params.n_batch.min(params.n_ctx);
        let capacity = params.n_ctx as usize;
        let d = self.weights.d_model;
        if buffer_len(capacity, d).is_none() {
            return Err(EngineError::ContextInit(format!(
                "{capacity} positions x {d} cache exceeds limit {MAX_BUFFER_ELEMENTS}"
            )));
        }
        Ok(TinyContext {
            weights: Arc::clone(&self.weights),
            has_encoder: self.has_encoder(),
            n_ctx: params.n_ctx,
            n_batch,
            n_threads: params.n_threads,
            kv: KvCache::new(capacity, d),
            encoder: KvCache::new(if self.has_encoder() { capacity } else { 0 }, d),
            logits: Vec::new(),
        })
    }
}

/// Decode state for one [`TinyModel`].
#[derive(Debug)]
pub struct TinyContext {
    weights: Arc<Weights>,
    has_encoder: bool,
    n_ctx: u32,
    n_batch: u32,
    n_threads: u32,
    kv: KvCache,
    encoder: KvCache,
    /// Empty until a decode has produced logits.
    logits: Vec<f32>,
}

impl TinyContext {
    pub fn n_threads(&self) -> u32 {
        self.n_threads
    }

    /// Positions currently held in the KV cache.
    pub fn n_past(&self) -> usize {
        self.kv.seq_len()
    }

    fn check_tokens(&self, tokens: &[TokenId]) -> std::result::Result<(), String> {
        if tokens.is_empty() {
            return Err("empty batch".to_string());
        }
        if tokens.len() > self.n_batch as usize {
            return Err(format!(
                "batch of {} tokens exceeds n_batch {}",
                tokens.len(),
                self.n_batch
            ));
        }
        if let Some(&bad) = tokens
            .iter()
            .find(|&&t| t < 0 || t as usize >= self.weights.n_vocab)
        {
            return Err(format!("invalid token {bad}"));
        }
        Ok(())
    }
}

impl EngineContext for TinyContext {
    fn clear_memory(&mut self) {
        self.kv.clear();
        self.encoder.clear();
        self.logits.clear();
    }

    fn encode(&mut self, tokens: &[TokenId]) -> Result<()> {
        if !self.has_encoder {
            return Err(EngineError::Encode(
                "model has no encoder".to_string(),
            ));
        }
        self.check_tokens(tokens).map_err(EngineError::Encode)?;

        let w = Arc::clone(&self.weights);
        self.encoder.clear();
        for (pos, &token) in tokens.iter().enumerate() {
            let x = w.embedding(token);
            let mut k = w.project(&w.wk, x);
            let v = w.project(&w.wv, x);
            w.rope(&mut k, pos);
            self.encoder
                .append(&k, &v)
                .map_err(|e| EngineError::Encode(e.to_string()))?;
        }
        Ok(())
    }

    fn decode(&mut self, tokens: &[TokenId]) -> Result<()> {
        self.check_tokens(tokens).map_err(EngineError::Decode)?;
        if tokens.len() > self.kv.remaining() {
            return Err(EngineError::Decode(format!(
                "context full: {} of {} positions used, {} requested",
                self.kv.seq_len(),
                self.n_ctx,
                tokens.len()
            )));
        }

        let w = Arc::clone(&self.weights);
        let mut hidden = Vec::new();
        for &token in tokens {
            let pos = self.kv.seq_len();
            let x = w.embedding(token);
            let mut q = w.project(&w.wq, x);
            let mut k = w.project(&w.wk, x);
            let v = w.project(&w.wv, x);
            w.rope(&mut q, pos);
            w.rope(&mut k, pos);
            self.kv
                .append(&k, &v)
                .map_err(|e| EngineError::Decode(e.to_string()))?;

            let attn = attend(&q, &self.kv);
            let cross = attend(&q, &self.encoder);
            hidden = x
                .iter()
                .zip(&attn)
                .zip(&cross)
                .map(|((x, a), c)| x + a + c)
                .collect();
        }

        self.logits = w.logits(&hidden);
        Ok(())
    }

    fn logits(&self) -> Option<&[f32]> {
        if self.logits.is_empty() {
            None
        } else {
            Some(&self.logits)
        }
    }

    fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    fn n_batch(&self) -> u32 {
        self.n_batch
    }
}
