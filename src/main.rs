//! spark-chat - stream one Spark chat turn to the terminal
//!
//! Credentials and defaults come from CLI flags, then SPARK_* env vars
//! (a .env file is honored), then ~/.spark-chat/config.toml.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt};

use spark_chat::config::{self, Config};
use spark_chat::grounding::extract_boxes;
use spark_chat::signer::sign_url;
use spark_chat::{ChatMessage, ChatSession, DEFAULT_URL, Domain};

#[derive(Parser)]
#[command(name = "spark-chat")]
#[command(about = "Stream a reply from the Spark chat API")]
struct Args {
    /// User prompt
    #[arg(required = true)]
    prompt: Vec<String>,

    /// System prompt (only honored by generalv3.5)
    #[arg(long)]
    system: Option<String>,

    /// WebSocket endpoint
    #[arg(long, env = "SPARK_URL")]
    url: Option<String>,

    /// Domain override, e.g. generalv3
    #[arg(long)]
    domain: Option<String>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    top_k: Option<u8>,

    /// Idle timeout in seconds (0 waits forever)
    #[arg(long)]
    timeout: Option<u64>,

    #[arg(long, env = "SPARK_APP_ID")]
    app_id: Option<String>,

    #[arg(long, env = "SPARK_API_KEY")]
    api_key: Option<String>,

    #[arg(long, env = "SPARK_API_SECRET", hide_env_values = true)]
    api_secret: Option<String>,

    /// Print a freshly signed URL and exit
    #[arg(long)]
    print_url: bool,

    /// List grounding boxes found in the reply
    #[arg(long)]
    boxes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load();

    // CLI args > env vars (handled by clap) > config file > defaults
    let url = args
        .url
        .or(config.url.clone())
        .unwrap_or_else(|| DEFAULT_URL.to_string());

    let credentials = config::require_credentials(
        args.app_id.or(config.app_id.clone()),
        args.api_key.or(config.api_key.clone()),
        args.api_secret.or(config.api_secret.clone()),
    )?;

    if args.print_url {
        let signed = sign_url(&credentials.api_key, &credentials.api_secret, &url)
            .context("Failed to sign URL")?;
        println!("{}", signed);
        return Ok(());
    }

    let mut params = config.parameters();
    if let Some(domain) = args.domain {
        params.domain = domain.parse::<Domain>().ok();
    }
    if let Some(t) = args.temperature {
        params.temperature = t;
    }
    if let Some(n) = args.max_tokens {
        params.max_tokens = n;
    }
    if let Some(k) = args.top_k {
        params.top_k = k;
    }

    let timeout = match args.timeout {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => config.timeout(),
    };

    let mut conversation = Vec::new();
    if let Some(system) = args.system {
        conversation.push(ChatMessage::system(system));
    }
    conversation.push(ChatMessage::user(args.prompt.join(" ")));

    info!("Endpoint: {}", url);
    debug!("Parameters: {:?}", params);

    let session = ChatSession::new(credentials)
        .with_timeout(timeout)
        .on_chunk(|text| {
            print!("{}", text);
            let _ = std::io::stdout().flush();
        });

    let handle = session.connect(conversation, url, params);

    let token = handle.cancellation_token();
    let cancel = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let outcome = handle.join().await?;
    cancel.abort();
    println!();

    if let Some(usage) = outcome.usage {
        eprintln!(
            "tokens: prompt={} completion={} total={}",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        );
    }

    if args.boxes {
        for b in extract_boxes(&outcome.text) {
            println!("{}: ({},{}) - ({},{})", b.label, b.x1, b.y1, b.x2, b.y2);
        }
    }

    if outcome.is_cancelled() {
        info!("Cancelled, partial reply kept");
        return Ok(());
    }
    outcome.into_result().context("Chat session failed")?;
    Ok(())
}
