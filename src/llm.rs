use std::num::NonZeroU32;
use std::pin::pin;

use anyhow::{Context, Result};
use log::{debug, info, trace, warn};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;

use crate::error::GenerationError;
use crate::generate::{
    parse_arc_payload, parse_node_payload, ContentGenerator, NodePayload, NodeRequest,
};
use crate::prompt::{arc_messages, node_messages, ChatMessage};
use crate::story::NarrativeArc;

// ---------------------------------------------------------------------------
// Model configuration
// ---------------------------------------------------------------------------

pub struct ModelConfig {
    /// How many layers to offload to GPU (0 = CPU only).
    pub n_gpu_layers: u32,
    /// Context window size in tokens.
    pub n_ctx: u32,
    /// Maximum tokens to generate per completion.
    pub max_tokens: usize,
    pub temperature: f32,
    pub seed: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_gpu_layers: 0,
            n_ctx: 8092,
            max_tokens: 1024,
            temperature: 0.8,
            seed: 1234,
        }
    }
}

fn build_sampler(temperature: f32, seed: u32) -> LlamaSampler {
    LlamaSampler::chain_simple([
        LlamaSampler::penalties(64, 1.1, 0.0, 0.0),
        LlamaSampler::top_k(40),
        LlamaSampler::top_p(0.95, 1),
        LlamaSampler::min_p(0.05, 1),
        LlamaSampler::temp(temperature),
        LlamaSampler::dist(seed),
    ])
}

// ---------------------------------------------------------------------------
// LLM: loaded model handle
// ---------------------------------------------------------------------------

pub struct LLM {
    #[allow(dead_code)]
    backend: &'static LlamaBackend,
    model: &'static LlamaModel,
    ctx: LlamaContext<'static>,
    n_ctx: u32,
    max_tokens: usize,
    temperature: f32,
    seed: u32,
    calls: u32,
}

impl LLM {
    pub fn load_model(model_path: &str, config: ModelConfig) -> Result<Self> {
        let backend: &'static LlamaBackend = Box::leak(Box::new(
            LlamaBackend::init().context("failed to init llama backend")?,
        ));

        info!("Loading model from: {model_path}");
        info!(
            "  config: n_gpu_layers={}, n_ctx={}, max_tokens={}, temperature={}",
            config.n_gpu_layers, config.n_ctx, config.max_tokens, config.temperature
        );

        let model_params = pin!(LlamaModelParams::default().with_n_gpu_layers(config.n_gpu_layers));
        let model: &'static LlamaModel = Box::leak(Box::new(
            LlamaModel::load_from_file(backend, model_path, &model_params)
                .context("failed to load model")?,
        ));

        info!("Model loaded successfully");

        let n_ctx = NonZeroU32::new(config.n_ctx).context("context size must be > 0")?;
        let ctx_params = LlamaContextParams::default().with_n_ctx(Some(n_ctx));
        let ctx = model
            .new_context(backend, ctx_params)
            .context("failed to create inference context")?;

        Ok(Self {
            backend,
            model,
            ctx,
            n_ctx: config.n_ctx,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            seed: config.seed,
            calls: 0,
        })
    }

    /// Run a chat completion and return the raw text.
    pub fn chat(&mut self, messages: &[ChatMessage]) -> Result<String> {
        // A fresh seed per call keeps retries from repeating the same output.
        let seed = self.seed.wrapping_add(self.calls);
        self.calls = self.calls.wrapping_add(1);
        let mut sampler = build_sampler(self.temperature, seed);
        self.generate(messages, &mut sampler)
    }

    /// Core generation: tokenize messages, feed prompt, sample tokens.
    fn generate(&mut self, messages: &[ChatMessage], sampler: &mut LlamaSampler) -> Result<String> {
        info!("=== LLM CALL: {} messages ===", messages.len());
        for (i, msg) in messages.iter().enumerate() {
            debug!("  msg[{i}] {msg}");
        }

        self.ctx.clear_kv_cache();

        let llama_msgs: Vec<LlamaChatMessage> = messages
            .iter()
            .map(|m| LlamaChatMessage::new(m.role.clone(), m.content.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to create chat messages")?;

        let tmpl = self
            .model
            .chat_template(None)
            .context("model has no chat template")?;
        let prompt = self
            .model
            .apply_chat_template(&tmpl, &llama_msgs, true)
            .context("failed to apply chat template")?;

        trace!("=== RENDERED PROMPT ===\n{prompt}\n=== END PROMPT ===");

        let tokens = self
            .model
            .str_to_token(&prompt, AddBos::Always)
            .context("tokenization failed")?;

        info!("Prompt tokenized: {} tokens", tokens.len());
        if tokens.is_empty() {
            anyhow::bail!("prompt rendered to zero tokens");
        }
        if tokens.len() >= self.n_ctx as usize {
            anyhow::bail!(
                "prompt of {} tokens does not fit a context of {}",
                tokens.len(),
                self.n_ctx
            );
        }

        let mut batch = LlamaBatch::new(self.n_ctx as usize, 1);
        let last_idx = (tokens.len() - 1) as i32;
        for (i, tok) in (0i32..).zip(tokens.iter()) {
            batch.add(*tok, i, &[0], i == last_idx)?;
        }
        self.ctx
            .decode(&mut batch)
            .context("initial decode failed")?;

        let mut output = String::new();
        let mut decoder = encoding_rs::UTF_8.new_decoder();
        let mut n_cur = batch.n_tokens();

        for _ in 0..self.max_tokens {
            if n_cur as u32 >= self.n_ctx {
                warn!("Context window full, stopping generation");
                break;
            }
            let tok = sampler.sample(&self.ctx, batch.n_tokens() - 1);
            sampler.accept(tok);

            if self.model.is_eog_token(tok) {
                debug!("Hit EOG token, stopping generation");
                break;
            }

            let piece = self
                .model
                .token_to_piece(tok, &mut decoder, true, None)
                .context("token_to_piece failed")?;
            output.push_str(&piece);

            batch.clear();
            batch.add(tok, n_cur, &[0], true)?;
            self.ctx.decode(&mut batch).context("decode step failed")?;
            n_cur += 1;
        }

        info!(
            "=== LLM RAW OUTPUT ({} chars) ===\n{}\n=== END OUTPUT ===",
            output.len(),
            output
        );

        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Story generation
// ---------------------------------------------------------------------------

impl ContentGenerator for LLM {
    fn generate_node(&mut self, request: &NodeRequest) -> Result<NodePayload, GenerationError> {
        let raw = self
            .chat(&node_messages(request))
            .map_err(|e| GenerationError::Backend(format!("{e:#}")))?;
        parse_node_payload(&raw).map_err(|e| GenerationError::Malformed(format!("{e:#}")))
    }

    fn generate_arc(&mut self, theme: &str) -> Result<NarrativeArc, GenerationError> {
        let raw = self
            .chat(&arc_messages(theme))
            .map_err(|e| GenerationError::Backend(format!("{e:#}")))?;
        parse_arc_payload(&raw).map_err(|e| GenerationError::Malformed(format!("{e:#}")))
    }
}
