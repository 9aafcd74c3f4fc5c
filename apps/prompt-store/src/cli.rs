use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::seq::SliceRandom;
use relay_core::{config::DEFAULT_QUEUE_URL, HttpInstructionQueue, InstructionQueue};

const SAMPLE_PROMPTS: &[&str] = &[
    "Transform this into a cyberpunk city",
    "Make this look like a magical forest",
    "Turn this into a space station",
    "Create a medieval castle environment",
    "Make this look like an underwater world",
];

#[derive(Parser, Debug)]
#[command(name = "prompt-store")]
#[command(about = "Single-slot instruction store and client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Put an instruction into a running store
    Send {
        /// Store base URL
        #[arg(short, long, env = "PROMPT_STORE_URL", default_value = DEFAULT_QUEUE_URL)]
        url: String,

        /// Instruction text; a sample prompt is picked when omitted
        text: Option<String>,
    },

    /// Print the pending instruction, if any
    Peek {
        /// Store base URL
        #[arg(short, long, env = "PROMPT_STORE_URL", default_value = DEFAULT_QUEUE_URL)]
        url: String,
    },
}

pub fn sample_prompt() -> &'static str {
    SAMPLE_PROMPTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(SAMPLE_PROMPTS[0])
}

pub async fn run_send(url: String, text: Option<String>) -> Result<()> {
    let text = text.unwrap_or_else(|| sample_prompt().to_string());
    let queue = HttpInstructionQueue::new(url);
    let receipt = queue
        .put(text)
        .await
        .with_context(|| format!("failed to send instruction to {}", queue.base_url()))?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

pub async fn run_peek(url: String) -> Result<()> {
    let queue = HttpInstructionQueue::new(url);
    let pending = queue
        .fetch()
        .await
        .with_context(|| format!("failed to query {}", queue.base_url()))?;
    match pending {
        Some(instruction) => println!("{}", serde_json::to_string_pretty(&instruction)?),
        None => println!("no instruction pending"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::net::TcpListener;

    use super::*;
    use crate::handlers::build_router;
    use crate::storage::Storage;

    async fn serve() -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener bind");
        let addr = listener.local_addr().expect("local addr");
        let router = build_router(Arc::new(Storage::in_memory()));
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{addr}")
    }

    #[test_timeout::timeout]
    fn parses_send_with_and_without_text() {
        let cli = Cli::try_parse_from(["prompt-store", "send", "hello there"]).unwrap();
        match cli.command {
            Some(Commands::Send { text, .. }) => assert_eq!(text.as_deref(), Some("hello there")),
            other => panic!("unexpected command: {other:?}"),
        }
        let cli = Cli::try_parse_from(["prompt-store"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test_timeout::timeout]
    fn sample_prompt_is_one_of_the_samples() {
        assert!(SAMPLE_PROMPTS.contains(&sample_prompt()));
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn http_queue_round_trips_through_the_store() {
        let base = serve().await;
        let queue = HttpInstructionQueue::new(format!("{base}/"));
        assert!(queue.fetch().await.unwrap().is_none());

        let receipt = queue.put("Create a medieval castle environment").await.unwrap();
        assert!(receipt.success);
        let pending = queue.fetch().await.unwrap().unwrap();
        assert_eq!(pending.issued_at, receipt.issued_at);
        assert!(!pending.consumed);

        assert!(!queue.complete(receipt.issued_at + 1).await.unwrap());
        assert!(queue.complete(receipt.issued_at).await.unwrap());
        assert!(queue.fetch().await.unwrap().is_none());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn empty_put_surfaces_status() {
        let base = serve().await;
        let queue = HttpInstructionQueue::new(base);
        let err = queue.put("").await.unwrap_err();
        match err {
            relay_core::QueueError::UnexpectedStatus { status, .. } => {
                assert_eq!(status.as_u16(), 400)
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
