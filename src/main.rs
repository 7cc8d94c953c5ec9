mod game;

use anyhow::{Context, Result};
use arcweaver::llm::{ModelConfig, LLM};

fn main() -> Result<()> {
    // Initialize logging. Control verbosity with RUST_LOG env var:
    //   RUST_LOG=info   # build progress, transitions, saves
    //   RUST_LOG=debug  # + requests and parsed payloads
    //   RUST_LOG=trace  # + full rendered prompt template
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().collect();

    let model_path = args.get(1).context(
        "Usage: arcweaver <path-to-model.gguf> [gpu_layers] [context_size] [max_tokens]\n\
         \n\
         Example:\n  arcweaver ./models/qwen2.5-7b-instruct-q4_k_m.gguf 99 8092 1024\n\
         \n\
         Logging: set RUST_LOG=debug or RUST_LOG=trace for verbose output",
    )?;

    let defaults = ModelConfig::default();
    let config = ModelConfig {
        n_gpu_layers: args
            .get(2)
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.n_gpu_layers),
        n_ctx: args.get(3).and_then(|s| s.parse().ok()).unwrap_or(defaults.n_ctx),
        max_tokens: args
            .get(4)
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_tokens),
        ..defaults
    };

    println!("Loading model: {model_path}");
    println!("  GPU layers : {}", config.n_gpu_layers);
    println!("  Context    : {}", config.n_ctx);
    println!("  Max tokens : {}", config.max_tokens);

    let mut loaded_model = LLM::load_model(model_path, config).context("failed to load model")?;

    game::run(&mut loaded_model)
}
