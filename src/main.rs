// Diagnostic check for the Copilot CLI
//
// Connects (spawning the CLI or dialing a running server), prints status,
// auth and model information, and optionally runs one prompt to completion.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kodegen_copilot_agent::{ClientOptions, CopilotClient, SessionConfig};

#[derive(Debug, Parser)]
#[command(name = "kodegen-copilot-agent", version, about = "Check a Copilot CLI connection")]
struct Args {
    /// Path to the CLI executable
    #[arg(long, env = "COPILOT_CLI_PATH", conflicts_with = "cli_url")]
    cli_path: Option<PathBuf>,

    /// Address of a running CLI server (host:port, http://host:port or a port)
    #[arg(long, env = "COPILOT_CLI_URL")]
    cli_url: Option<String>,

    /// Prompt to send in a fresh session
    #[arg(long)]
    prompt: Option<String>,

    /// Model for the prompt session
    #[arg(long)]
    model: Option<String>,

    /// Seconds to wait for the prompt to finish
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,

    /// Log filter for this process
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .parse_filters(&args.log_level)
        .init();

    let mut builder = ClientOptions::builder();
    if let Some(path) = args.cli_path {
        builder = builder.cli_path(path);
    }
    if let Some(url) = args.cli_url {
        builder = builder.cli_url(url);
    }
    let client = CopilotClient::new(builder.build()?)?;

    client.start().await.context("failed to connect to the Copilot CLI")?;
    log::info!(
        "Connected (protocol version {:?})",
        client.protocol_version()
    );

    let outcome = diagnose(&client, args.prompt, args.model, args.timeout_secs).await;

    if let Err(e) = client.stop().await {
        log::warn!("Stop failed: {e}");
    }
    outcome
}

async fn diagnose(
    client: &CopilotClient,
    prompt: Option<String>,
    model: Option<String>,
    timeout_secs: u64,
) -> Result<()> {
    let status = client.get_status().await?;
    println!("version:  {}", status.version.as_deref().unwrap_or("unknown"));
    if let Some(protocol) = status.protocol_version {
        println!("protocol: {protocol}");
    }

    let auth = client.get_auth_status().await?;
    println!(
        "auth:     {}",
        if auth.is_authenticated {
            auth.login.as_deref().unwrap_or("authenticated")
        } else {
            "not authenticated"
        }
    );

    match client.list_models().await {
        Ok(models) => {
            for model in models {
                println!(
                    "model:    {} ({})",
                    model.id,
                    model.name.as_deref().unwrap_or("-")
                );
            }
        }
        Err(e) => log::warn!("Could not list models: {e}"),
    }

    let Some(prompt) = prompt else {
        return Ok(());
    };

    let mut config = SessionConfig::builder();
    if let Some(model) = model {
        config = config.model(model);
    }
    let session = client.create_session(config.build()).await?;
    log::info!("Created session {}", session.session_id());

    let reply = session
        .send_and_wait(prompt, Some(Duration::from_secs(timeout_secs)))
        .await;
    session.close();

    match reply? {
        Some(message) => println!("{}", message.content.unwrap_or_default()),
        None => println!("(no assistant message)"),
    }
    Ok(())
}
