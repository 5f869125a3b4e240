//! The tokenize → prime → sample/emit/decode loop shared by blocking and
//! streaming inference.

use llmshim_engine::{EngineContext, EngineModel, TokenId};
use llmshim_runtime::GenerationTimer;
use llmshim_sampling::{SamplerChain, SamplerParams, SamplingError};

use crate::completion::{Completion, FinishReason};
use crate::error::{Error, Result};
use crate::options::InferOptions;
use crate::session::Session;
use crate::sink::TokenSink;

/// Per-call parameters after falling back to session defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Resolved {
    max_tokens: i32,
    sampler: SamplerParams,
}

impl<M: EngineModel> Session<M> {
    fn resolve(&self, options: &InferOptions) -> Resolved {
        let d = &self.defaults;
        Resolved {
            max_tokens: options.max_tokens.unwrap_or(d.max_tokens),
            sampler: SamplerParams {
                temperature: options.temperature.unwrap_or(d.temperature),
                top_p: options.top_p.unwrap_or(d.top_p),
                top_k: options.top_k.unwrap_or(d.top_k),
                seed: options.seed.filter(|&s| s != 0).unwrap_or(d.seed),
            },
        }
    }

    pub(crate) fn generate<S>(&mut self, options: &InferOptions, sink: &mut S) -> Result<Completion>
    where
        S: TokenSink + ?Sized,
    {
        let _span = tracing::debug_span!("infer", session = %self.id).entered();

        let resolved = self.resolve(options);
        if resolved.max_tokens <= 0 {
            return Ok(Completion::cancelled());
        }
        let max_tokens = resolved.max_tokens as usize;

        let engine = self.model.engine();
        let prompt = engine
            .tokenize(&options.prompt, true, true)
            .map_err(Error::from_tokenize)?;
        if prompt.is_empty() {
            return Err(Error::EmptyPrompt);
        }

        self.ctx.clear_memory();

        let mut sampler =
            SamplerChain::build(&resolved.sampler).map_err(Error::SamplerConstruction)?;

        let decoder_start: [TokenId; 1];
        let priming: &[TokenId] = if engine.has_encoder() {
            self.ctx.encode(&prompt).map_err(Error::Encode)?;
            decoder_start = [engine
                .decoder_start_token()
                .unwrap_or_else(|| engine.token_bos())];
            &decoder_start
        } else {
            &prompt
        };

        tracing::debug!(
            prompt_tokens = prompt.len(),
            batch_tokens = priming.len(),
            max_tokens,
            greedy = sampler.is_greedy(),
            "priming"
        );

        let mut timer =
            GenerationTimer::start(self.model.backend(), prompt.len(), self.telemetry.as_ref());
        self.ctx.decode(priming).map_err(Error::Prime)?;
        timer.mark_primed();

        let mut completion = Completion::default();
        let mut finish_reason = FinishReason::Stop;
        let mut cancelled = false;

        for _ in 0..max_tokens {
            let logits = self
                .ctx
                .logits()
                .ok_or(Error::Sample(SamplingError::InvalidLogits))?;
            let token = sampler.sample(logits).map_err(Error::Sample)? as TokenId;
            if engine.is_eog(token) {
                finish_reason = FinishReason::Stop;
                break;
            }

            let fragment = engine.token_to_piece(token).map_err(Error::TokenText)?;
            if sink.on_token(&fragment).is_break() {
                cancelled = true;
                finish_reason = FinishReason::Cancelled;
                break;
            }
            completion.push(fragment);
            timer.mark_token();

            self.ctx.decode(&[token]).map_err(Error::DecodeToken)?;
        }

        if !cancelled && completion.token_count() >= max_tokens {
            finish_reason = FinishReason::Length;
        }

        let metrics = timer.finish();
        completion.latency_ms = metrics.latency_ms();
        completion.finish_reason = finish_reason;
        Ok(completion)
    }
}
