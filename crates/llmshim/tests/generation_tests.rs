//! Generation engine tests against a scripted engine.
//!
//! Validates:
//! - STOP / LENGTH / CANCELLED resolution and `text == concat(tokens)`
//! - Streaming cancellation drops the triggering fragment and stops callbacks
//! - Every call clears engine memory before priming
//! - Encoder–decoder priming (encode, then decoder start token or BOS)
//! - Each failure point maps to its error class and message
//! - Context length / batch size / thread resolution at session creation

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::{Arc, Mutex};

use llmshim::{
    CaptureTelemetry, EngineModel, ErrorCode, FinishReason, InferOptions, Model, ModelOptions,
    Session, SessionOptions, TokenId, FALLBACK_CONTEXT_LENGTH,
};
use llmshim_engine::{ContextParams, EngineContext, EngineError, ModelParams, Result};

// ---------------------------------------------------------------------------
// Scripted Backend
// ---------------------------------------------------------------------------

const EOG: TokenId = 0;
const BOS: TokenId = 1;
const WORD: TokenId = 2;
const BAD_PIECE: TokenId = 6;
const PIECES: [&str; 7] = ["</s>", "<s>", "Hello", " world", "!", "?", "\u{fffd}"];

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Tokenize { add_special: bool, parse_special: bool },
    NewContext(ContextParams),
    Clear,
    Encode(Vec<TokenId>),
    Decode(Vec<TokenId>),
}

/// What the engine does on each call. `emit[i]` is the token whose logit
/// peaks after the i-th decode of a call; past the end the model emits EOG.
#[derive(Debug, Clone, Default)]
struct Script {
    emit: Vec<TokenId>,
    n_ctx_train: i32,
    encoder: bool,
    decoder_start: Option<TokenId>,
    tokenize_error: Option<EngineError>,
    empty_prompt: bool,
    fail_context: bool,
    fail_encode: bool,
    fail_prime: bool,
    /// Fail the decode of the n-th generated token (0-based).
    fail_decode_at: Option<usize>,
    no_logits: bool,
}

#[derive(Debug)]
struct ScriptedModel {
    script: Script,
    events: Arc<Mutex<Vec<Event>>>,
}

impl ScriptedModel {
    fn new(script: Script) -> (Self, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let model = Self {
            script,
            events: Arc::clone(&events),
        };
        (model, events)
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

struct ScriptedContext {
    script: Script,
    events: Arc<Mutex<Vec<Event>>>,
    n_ctx: u32,
    n_batch: u32,
    decodes: usize,
    logits: Vec<f32>,
}

impl EngineModel for ScriptedModel {
    type Context = ScriptedContext;

    fn load(path: &Path, _params: &ModelParams) -> Result<Self> {
        if path.ends_with("missing.bin") {
            return Err(EngineError::ModelLoad("no such file".to_string()));
        }
        Ok(Self::new(Script {
            emit: vec![WORD, 3, 4],
            n_ctx_train: 2048,
            ..Script::default()
        })
        .0)
    }

    fn n_ctx_train(&self) -> i32 {
        self.script.n_ctx_train
    }

    fn n_vocab(&self) -> usize {
        PIECES.len()
    }

    fn has_encoder(&self) -> bool {
        self.script.encoder
    }

    fn decoder_start_token(&self) -> Option<TokenId> {
        self.script.decoder_start
    }

    fn token_bos(&self) -> TokenId {
        BOS
    }

    fn tokenize(&self, text: &str, add_special: bool, parse_special: bool) -> Result<Vec<TokenId>> {
        self.record(Event::Tokenize {
            add_special,
            parse_special,
        });
        if let Some(err) = &self.script.tokenize_error {
            return Err(err.clone());
        }
        if self.script.empty_prompt {
            return Ok(Vec::new());
        }
        let mut ids = vec![BOS];
        ids.extend(text.split_whitespace().map(|_| WORD));
        Ok(ids)
    }

    fn token_to_piece(&self, token: TokenId) -> Result<String> {
        if token == BAD_PIECE {
            return Err(EngineError::TokenPiece {
                token,
                reason: "invalid utf-8".to_string(),
            });
        }
        Ok(PIECES[token as usize].to_string())
    }

    fn is_eog(&self, token: TokenId) -> bool {
        token == EOG
    }

    fn new_context(&self, params: &ContextParams) -> Result<ScriptedContext> {
        self.record(Event::NewContext(*params));
        if self.script.fail_context {
            return Err(EngineError::ContextInit("out of memory".to_string()));
        }
        Ok(ScriptedContext {
            script: self.script.clone(),
            events: Arc::clone(&self.events),
            n_ctx: params.n_ctx,
            n_batch: params.n_batch,
            decodes: 0,
            logits: Vec::new(),
        })
    }
}

impl EngineContext for ScriptedContext {
    fn clear_memory(&mut self) {
        self.events.lock().unwrap().push(Event::Clear);
        self.decodes = 0;
        self.logits.clear();
    }

    fn encode(&mut self, tokens: &[TokenId]) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Encode(tokens.to_vec()));
        if self.script.fail_encode {
            return Err(EngineError::Encode("encoder exploded".to_string()));
        }
        Ok(())
    }

    fn decode(&mut self, tokens: &[TokenId]) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Decode(tokens.to_vec()));
        if self.decodes == 0 && self.script.fail_prime {
            return Err(EngineError::Decode("prompt too long".to_string()));
        }
        if self.decodes > 0 && self.script.fail_decode_at == Some(self.decodes - 1) {
            return Err(EngineError::Decode("context full".to_string()));
        }

        let next = self.script.emit.get(self.decodes).copied().unwrap_or(EOG);
        self.decodes += 1;
        self.logits = vec![0.0; PIECES.len()];
        if !self.script.no_logits {
            self.logits[next as usize] = 20.0;
        } else {
            self.logits.clear();
        }
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

fn session_with(
    script: Script,
    options: SessionOptions,
) -> (Session<ScriptedModel>, Arc<Mutex<Vec<Event>>>) {
    let (engine, events) = ScriptedModel::new(script);
    let model = Model::from_engine(engine, &ModelOptions::default());
    let session = Session::new(model, &options).unwrap();
    events.lock().unwrap().clear();
    (session, events)
}

fn scripted(emit: Vec<TokenId>) -> (Session<ScriptedModel>, Arc<Mutex<Vec<Event>>>) {
    session_with(
        Script {
            emit,
            ..Script::default()
        },
        SessionOptions::default(),
    )
}

// ===== Section A: Finish Reasons =====

#[test]
fn stops_at_end_of_generation() {
    let (mut s, _) = scripted(vec![WORD, 3, 4, EOG, 5]);
    let out = s.infer(&InferOptions::new("hi")).unwrap();
    assert_eq!(out.finish_reason, FinishReason::Stop);
    assert_eq!(out.tokens, vec!["Hello", " world", "!"]);
    assert_eq!(out.text, "Hello world!");
    assert_eq!(out.token_count(), 3);
}

#[test]
fn length_when_budget_exhausted() {
    let (mut s, _) = scripted(vec![WORD, 3, 4, 5, 4, 5]);
    let out = s.infer(&InferOptions::new("hi").with_max_tokens(4)).unwrap();
    assert_eq!(out.finish_reason, FinishReason::Length);
    assert_eq!(out.token_count(), 4);
    assert_eq!(out.text, out.tokens.concat());
}

#[test]
fn budget_reached_exactly_before_eog_is_length() {
    let (mut s, _) = scripted(vec![WORD, 3, EOG]);
    let out = s.infer(&InferOptions::new("hi").with_max_tokens(2)).unwrap();
    assert_eq!(out.finish_reason, FinishReason::Length);
    assert_eq!(out.text, "Hello world");
}

#[test]
fn eog_first_gives_empty_stop() {
    let (mut s, _) = scripted(vec![EOG]);
    let out = s.infer(&InferOptions::new("hi")).unwrap();
    assert_eq!(out.finish_reason, FinishReason::Stop);
    assert!(out.tokens.is_empty());
    assert!(out.text.is_empty());
}

#[test]
fn non_positive_budget_short_circuits() {
    for budget in [0, -1, -100] {
        let (mut s, events) = scripted(vec![WORD]);
        let out = s
            .infer(&InferOptions::new("hi").with_max_tokens(budget))
            .unwrap();
        assert_eq!(out.finish_reason, FinishReason::Cancelled);
        assert!(out.text.is_empty());
        assert_eq!(out.token_count(), 0);
        assert_eq!(out.latency_ms, 0);
        assert!(events.lock().unwrap().is_empty(), "engine must not be touched");
    }
}

#[test]
fn session_budget_used_when_call_leaves_it_unset() {
    let (mut s, _) = session_with(
        Script {
            emit: vec![WORD; 10],
            ..Script::default()
        },
        SessionOptions::default().with_max_tokens(3),
    );
    let out = s.infer(&InferOptions::new("hi")).unwrap();
    assert_eq!(out.token_count(), 3);
    assert_eq!(out.finish_reason, FinishReason::Length);
}

// ===== Section B: Streaming =====

#[test]
fn streaming_cancel_on_nth_callback() {
    for n in 1..=4 {
        let (mut s, _) = scripted(vec![WORD, 3, 4, 5, 4, 5]);
        let mut calls = 0;
        let out = s
            .infer_streaming(&InferOptions::new("hi").with_max_tokens(6), |_: &str| {
                calls += 1;
                if calls == n {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(calls, n, "no callback after cancellation");
        assert_eq!(out.token_count(), n - 1);
        assert_eq!(out.finish_reason, FinishReason::Cancelled);
        assert_eq!(out.text, out.tokens.concat());
    }
}

#[test]
fn cancel_on_last_budgeted_token_is_not_length() {
    let (mut s, _) = scripted(vec![WORD, 3]);
    let out = s
        .infer_streaming(&InferOptions::new("hi").with_max_tokens(1), |_: &str| {
            ControlFlow::Break(())
        })
        .unwrap();
    assert_eq!(out.finish_reason, FinishReason::Cancelled);
    assert_eq!(out.token_count(), 0);
}

#[test]
fn streaming_delivers_fragments_in_order() {
    let (mut s, _) = scripted(vec![WORD, 3, 4, EOG]);
    let mut seen = Vec::new();
    let out = s
        .infer_streaming(&InferOptions::new("hi"), |f: &str| {
            seen.push(f.to_string());
            ControlFlow::Continue(())
        })
        .unwrap();
    assert_eq!(seen, out.tokens);
    assert_eq!(out.finish_reason, FinishReason::Stop);
}

#[test]
fn streaming_into_channel() {
    let (mut s, _) = scripted(vec![WORD, 3, 4, EOG]);
    let (tx, rx) = crossbeam_channel::unbounded();
    let out = s.infer_streaming(&InferOptions::new("hi"), tx).unwrap();
    let received: Vec<String> = rx.try_iter().collect();
    assert_eq!(received, out.tokens);
}

#[test]
fn streaming_matches_blocking() {
    let (mut s, _) = scripted(vec![WORD, 3, 4, 5, EOG]);
    let blocking = s.infer(&InferOptions::new("hi")).unwrap();
    let streamed = s
        .infer_streaming(&InferOptions::new("hi"), |_: &str| ControlFlow::Continue(()))
        .unwrap();
    assert_eq!(blocking.tokens, streamed.tokens);
    assert_eq!(blocking.finish_reason, streamed.finish_reason);
}

// ===== Section C: Call Protocol =====

#[test]
fn every_call_clears_then_primes() {
    let (mut s, events) = scripted(vec![WORD, EOG]);
    s.infer(&InferOptions::new("a b")).unwrap();
    s.infer(&InferOptions::new("a b")).unwrap();

    let log = events.lock().unwrap().clone();
    let call = vec![
        Event::Tokenize {
            add_special: true,
            parse_special: true,
        },
        Event::Clear,
        Event::Decode(vec![BOS, WORD, WORD]),
        Event::Decode(vec![WORD]),
    ];
    assert_eq!(log, [call.clone(), call].concat());
}

#[test]
fn encoder_decoder_primes_with_start_token() {
    let (mut s, events) = session_with(
        Script {
            emit: vec![3, EOG],
            encoder: true,
            decoder_start: Some(5),
            ..Script::default()
        },
        SessionOptions::default(),
    );
    let out = s.infer(&InferOptions::new("x")).unwrap();
    assert_eq!(out.text, " world");

    let log = events.lock().unwrap().clone();
    assert_eq!(log[2], Event::Encode(vec![BOS, WORD]));
    assert_eq!(log[3], Event::Decode(vec![5]));
}

#[test]
fn encoder_decoder_falls_back_to_bos() {
    let (mut s, events) = session_with(
        Script {
            emit: vec![EOG],
            encoder: true,
            ..Script::default()
        },
        SessionOptions::default(),
    );
    s.infer(&InferOptions::new("x")).unwrap();
    assert!(events
        .lock()
        .unwrap()
        .contains(&Event::Decode(vec![BOS])));
}

#[test]
fn telemetry_sees_each_call() {
    let (s, _) = scripted(vec![WORD, 3, EOG]);
    let capture = CaptureTelemetry::new();
    let mut s = s.with_telemetry(capture.clone());
    s.infer(&InferOptions::new("one two three")).unwrap();

    let metrics = capture.last_metrics().unwrap();
    assert_eq!(metrics.prompt_tokens, 4);
    assert_eq!(metrics.generated_tokens, 2);
    assert_eq!(capture.tokens_seen(), 2);
}

// ===== Section D: Failure Classes =====

fn failing(script: Script) -> llmshim::Error {
    let (mut s, _) = session_with(script, SessionOptions::default());
    s.infer(&InferOptions::new("hi")).unwrap_err()
}

#[test]
fn tokenize_failures() {
    let err = failing(Script {
        tokenize_error: Some(EngineError::TokenOverflow),
        ..Script::default()
    });
    assert_eq!(err.code(), ErrorCode::Tokenize);
    assert_eq!(err.to_string(), "tokenization overflow");

    let err = failing(Script {
        empty_prompt: true,
        ..Script::default()
    });
    assert_eq!(err.code(), ErrorCode::Tokenize);
    assert_eq!(err.to_string(), "prompt produced no tokens");

    let err = failing(Script {
        tokenize_error: Some(EngineError::Tokenization("bad byte".into())),
        ..Script::default()
    });
    assert_eq!(err.code(), ErrorCode::Tokenize);
    assert!(err.to_string().starts_with("failed to tokenize prompt"));
}

#[test]
fn sampler_construction_failure() {
    let (mut s, _) = scripted(vec![WORD]);
    let err = s
        .infer(&InferOptions::new("hi").with_temperature(f32::NAN))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::SamplerConstruction);
    assert!(err
        .to_string()
        .starts_with("failed to construct sampler chain"));
}

#[test]
fn encode_failure() {
    let err = failing(Script {
        encoder: true,
        fail_encode: true,
        ..Script::default()
    });
    assert_eq!(err.code(), ErrorCode::Encode);
    assert!(err.to_string().starts_with("encoder evaluation failed"));
}

#[test]
fn prime_failure() {
    let err = failing(Script {
        fail_prime: true,
        ..Script::default()
    });
    assert_eq!(err.code(), ErrorCode::Decode);
    assert!(err.to_string().starts_with("failed to evaluate prompt"));
}

#[test]
fn per_token_decode_failure() {
    let err = failing(Script {
        emit: vec![WORD, 3, 4],
        fail_decode_at: Some(1),
        ..Script::default()
    });
    assert_eq!(err.code(), ErrorCode::Decode);
    assert!(err
        .to_string()
        .starts_with("failed to evaluate generated token"));
}

#[test]
fn token_text_failure() {
    let err = failing(Script {
        emit: vec![WORD, BAD_PIECE],
        ..Script::default()
    });
    assert_eq!(err.code(), ErrorCode::TokenText);
    assert!(err.to_string().starts_with("failed to convert token to text"));
}

#[test]
fn missing_logits_is_decode_failure() {
    let err = failing(Script {
        no_logits: true,
        ..Script::default()
    });
    assert_eq!(err.code(), ErrorCode::Decode);
}

#[test]
fn session_recovers_after_failed_call() {
    let (mut s, _) = scripted(vec![WORD, EOG]);
    assert!(s
        .infer(&InferOptions::new("hi").with_top_p(f32::INFINITY))
        .is_err());
    let out = s.infer(&InferOptions::new("hi")).unwrap();
    assert_eq!(out.text, "Hello");
}

// ===== Section E: Model and Session Setup =====

#[test]
fn context_length_zero_uses_model_default() {
    let (engine, events) = ScriptedModel::new(Script {
        n_ctx_train: 2048,
        ..Script::default()
    });
    let model = Model::from_engine(engine, &ModelOptions::default());
    assert_eq!(model.default_context_length(), 2048);

    let s = Session::new(model, &SessionOptions::default().with_context_length(0)).unwrap();
    assert_eq!(s.context_length(), 2048);
    assert_eq!(s.batch_size(), 2048);
    assert_eq!(
        events.lock().unwrap()[0],
        Event::NewContext(ContextParams {
            n_ctx: 2048,
            n_batch: 2048,
            n_ubatch: 2048,
            n_threads: 0,
        })
    );
}

#[test]
fn non_positive_training_context_falls_back() {
    for n in [0, -1] {
        let (engine, _) = ScriptedModel::new(Script {
            n_ctx_train: n,
            ..Script::default()
        });
        let model = Model::from_engine(engine, &ModelOptions::default());
        assert_eq!(model.default_context_length(), FALLBACK_CONTEXT_LENGTH);
    }
}

#[test]
fn model_options_override_context_and_threads() {
    let (engine, _) = ScriptedModel::new(Script {
        n_ctx_train: 2048,
        ..Script::default()
    });
    let model = Model::from_engine(
        engine,
        &ModelOptions::default()
            .with_context_length(512)
            .with_threads(3),
    );
    let s = Session::new(Arc::clone(&model), &SessionOptions::default()).unwrap();
    assert_eq!(s.context_length(), 512);
    assert_eq!(s.threads(), 3);

    let s = Session::new(model, &SessionOptions::default().with_threads(8)).unwrap();
    assert_eq!(s.threads(), 8);
}

#[test]
fn explicit_batch_size_kept() {
    let (s, _) = session_with(
        Script::default(),
        SessionOptions::default()
            .with_context_length(256)
            .with_batch_size(32),
    );
    assert_eq!(s.context_length(), 256);
    assert_eq!(s.batch_size(), 32);
}

#[test]
fn context_allocation_failure_is_general() {
    let (engine, _) = ScriptedModel::new(Script {
        fail_context: true,
        ..Script::default()
    });
    let model = Model::from_engine(engine, &ModelOptions::default());
    let err = Session::new(model, &SessionOptions::default()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::General);
}

#[test]
fn load_failures() {
    let err = Model::<ScriptedModel>::load("", &ModelOptions::default()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = Model::<ScriptedModel>::load("/models/missing.bin", &ModelOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::General);
    assert!(err.to_string().starts_with("failed to load model"));

    let model = Model::<ScriptedModel>::load("/models/ok.bin", &ModelOptions::default()).unwrap();
    assert_eq!(model.default_context_length(), 2048);
}

#[test]
fn session_outlives_dropped_model_handle() {
    let (engine, _) = ScriptedModel::new(Script {
        emit: vec![WORD, EOG],
        ..Script::default()
    });
    let model = Model::from_engine(engine, &ModelOptions::default());
    let mut s = Session::new(Arc::clone(&model), &SessionOptions::default()).unwrap();
    drop(model);
    assert_eq!(s.infer(&InferOptions::new("hi")).unwrap().text, "Hello");
}

#[test]
fn sessions_get_distinct_ids() {
    let (a, _) = scripted(vec![]);
    let (b, _) = scripted(vec![]);
    assert_ne!(a.id(), b.id());
}
