pub mod config_cmd;
pub mod generate;
pub mod run;

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use llama_chat::{GenerateEvent, Reply, SessionConfig, SharedChatSession, TurnOptions};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::CliConfig;

#[derive(Parser)]
#[command(
    name = "llama-chat",
    version,
    about = "Chat with a local GGUF model through llama.cpp"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, clap::Args, Clone)]
pub struct GlobalArgs {
    /// Config file (default: <config dir>/llama-chat/config.json).
    #[arg(long, global = true, env = "LLAMA_CHAT_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a model and start an interactive chat.
    Run(RunArgs),

    /// Reply to a single prompt and exit.
    Generate(GenerateArgs),

    /// View / edit configuration.
    Config(ConfigArgs),
}

//  Subcommand argument structs

/// Model loading flags; unset flags fall back to the config file.
#[derive(Debug, clap::Args, Clone)]
pub struct ModelArgs {
    /// Path to a GGUF model file.
    pub model: PathBuf,

    /// Context size in tokens.
    #[arg(long, env = "LLAMA_CHAT_CTX_SIZE")]
    pub ctx_size: Option<u32>,

    /// Prefill batch size.
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// GPU layers (-1 = all, 0 = CPU only).
    #[arg(long, env = "LLAMA_CHAT_GPU_LAYERS", allow_negative_numbers = true)]
    pub n_gpu_layers: Option<i32>,

    /// Threads.
    #[arg(long, env = "LLAMA_CHAT_THREADS")]
    pub threads: Option<i32>,

    /// Sampling seed.
    #[arg(long)]
    pub seed: Option<u32>,
}

impl ModelArgs {
    pub fn apply(&self, cfg: &mut SessionConfig) {
        if let Some(n) = self.ctx_size {
            cfg.n_ctx = n;
        }
        if let Some(n) = self.batch_size {
            cfg.n_batch = n;
        }
        if let Some(n) = self.n_gpu_layers {
            cfg.n_gpu_layers = n;
        }
        if self.threads.is_some() {
            cfg.n_threads = self.threads;
        }
        if let Some(seed) = self.seed {
            cfg.seed = seed;
        }
    }
}

#[derive(Debug, clap::Args, Clone)]
pub struct TurnArgs {
    /// Temperature.
    #[arg(long)]
    pub temp: Option<f32>,

    /// Maximum tokens per reply.
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// System prompt.
    #[arg(long)]
    pub system: Option<String>,
}

impl TurnArgs {
    pub fn options(&self, cfg: &CliConfig) -> TurnOptions {
        TurnOptions {
            max_tokens: self.max_tokens.unwrap_or(cfg.max_tokens),
            temperature: self.temp.unwrap_or(cfg.temperature),
        }
    }

    pub fn system<'a>(&'a self, cfg: &'a CliConfig) -> Option<&'a str> {
        self.system.as_deref().or(cfg.system.as_deref())
    }
}

#[derive(Debug, clap::Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub turn: TurnArgs,
}

#[derive(Debug, clap::Args, Clone)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// The user message to reply to.
    pub prompt: String,

    #[command(flatten)]
    pub turn: TurnArgs,
}

#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Display the current configuration.
    Show,
    /// Print the config file location.
    Path,
    /// Set a configuration value.
    Set { key: String, value: String },
}

//  Shared helpers

/// Load the model named by `args`, with config-file defaults.
pub fn open_session(args: &ModelArgs, cfg: &CliConfig) -> anyhow::Result<SharedChatSession> {
    let mut session_cfg = cfg.session.clone();
    args.apply(&mut session_cfg);

    info!(
        model = %args.model.display(),
        n_ctx = session_cfg.n_ctx,
        n_gpu_layers = session_cfg.n_gpu_layers,
        "Loading model…"
    );
    SharedChatSession::open(&args.model, &session_cfg)
        .with_context(|| format!("Could not open {}", args.model.display()))
}

/// Reply to the session's current history, writing pieces to `out` as they
/// arrive. Generation runs on a blocking worker; if writing fails the
/// channel closes and the worker stops after its current token.
pub async fn stream_turn(
    session: &SharedChatSession,
    opts: TurnOptions,
    out: &mut impl Write,
) -> anyhow::Result<Reply> {
    let (tx, mut rx) = mpsc::channel(64);

    let worker = session.clone();
    let handle = tokio::task::spawn_blocking(move || worker.lock().respond_events(&opts, tx));

    while let Some(event) = rx.recv().await {
        match event {
            GenerateEvent::Token(piece) => {
                out.write_all(&piece)?;
                out.flush()?;
            }
            GenerateEvent::Done {
                finish_reason,
                prompt_tokens,
                completion_tokens,
            } => {
                writeln!(out)?;
                eprintln!(
                    "  [{finish_reason} | prompt: {prompt_tokens} tok, gen: {completion_tokens} tok]"
                );
            }
            // reported through the worker's result
            GenerateEvent::Error(_) => {}
        }
    }

    Ok(handle.await??)
}

#[cfg(test)]
mod tests {
    use llama_chat::mock::{MockEngine, text_tokens};
    use llama_chat::{ChatSession, Engine, FinishReason};

    use super::*;

    fn shared(n_ctx: u32, reply: &[u8]) -> SharedChatSession {
        let engine: Box<dyn Engine + Send> =
            Box::new(MockEngine::new(n_ctx).with_reply(text_tokens(reply)));
        SharedChatSession::from_session(ChatSession::with_engine(engine, &SessionConfig::default()))
    }

    fn greedy() -> TurnOptions {
        TurnOptions {
            max_tokens: 64,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn streamed_output_matches_the_reply() {
        let session = shared(256, "héllo".as_bytes());
        session.lock().append_user("hi");

        let mut out = Vec::new();
        let reply = stream_turn(&session, greedy(), &mut out).await.unwrap();

        assert_eq!(reply.text(), "héllo");
        assert_eq!(reply.finish_reason, FinishReason::Stop);
        assert_eq!(out, "héllo\n".as_bytes());
    }

    #[tokio::test]
    async fn failed_turn_is_an_error() {
        let session = shared(16, b"unused");
        session.lock().append_user("far too long for sixteen tokens");

        let mut out = Vec::new();
        assert!(stream_turn(&session, greedy(), &mut out).await.is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "llama-chat",
            "run",
            "model.gguf",
            "--ctx-size",
            "1024",
            "--n-gpu-layers",
            "0",
            "--temp",
            "0.1",
        ]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let mut cfg = CliConfig::default();
        cfg.max_tokens = 99;
        args.model.apply(&mut cfg.session);
        let opts = args.turn.options(&cfg);

        assert_eq!(cfg.session.n_ctx, 1024);
        assert_eq!(cfg.session.n_gpu_layers, 0);
        assert_eq!(cfg.session.n_batch, 2048);
        assert_eq!(opts.temperature, 0.1);
        assert_eq!(opts.max_tokens, 99);
    }

    #[test]
    fn generate_takes_model_then_prompt() {
        let cli = Cli::parse_from(["llama-chat", "generate", "m.gguf", "Say hi", "--max-tokens", "8"]);
        let Commands::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.model.model, PathBuf::from("m.gguf"));
        assert_eq!(args.prompt, "Say hi");
        assert_eq!(args.turn.max_tokens, Some(8));
    }

    #[test]
    fn open_without_a_model_file_fails() {
        let args = ModelArgs {
            model: PathBuf::from("/nonexistent/model.gguf"),
            ctx_size: None,
            batch_size: None,
            n_gpu_layers: None,
            threads: None,
            seed: None,
        };
        assert!(open_session(&args, &CliConfig::default()).is_err());
    }
}
