use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::transcript::DEFAULT_EXPORT_FILE;

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8888";

#[derive(Parser)]
#[command(name = "assistant-relay")]
#[command(version)]
#[command(about = "Streaming relay between a hosted assistant and a chat widget")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Run the relay server and serve the chat widget
    Serve {
        /// TOML configuration file
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Port override
        #[arg(long)]
        port: Option<u16>,

        /// Bind address override
        #[arg(long)]
        bind: Option<String>,
    },

    /// Ask a single question through a running relay
    Ask {
        question: String,

        #[arg(long, default_value = DEFAULT_RELAY_URL)]
        relay: String,

        /// Assistant to ask instead of the relay's default
        #[arg(long)]
        assistant: Option<String>,

        /// Write the transcript to this file afterwards
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Interactive chat through a running relay
    Chat {
        #[arg(long, default_value = DEFAULT_RELAY_URL)]
        relay: String,

        #[arg(long)]
        assistant: Option<String>,
    },
}

/// Apply `serve` overrides on top of a loaded config.
pub fn apply_overrides(mut config: Config, port: Option<u16>, bind: Option<String>) -> Config {
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(bind) = bind {
        config.bind = bind;
    }
    config
}

/// A line typed at the chat prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum ChatInput {
    Question(String),
    Save(PathBuf),
    Quit,
    Empty,
}

pub fn parse_chat_input(line: &str) -> ChatInput {
    let line = line.trim();
    if line.is_empty() {
        return ChatInput::Empty;
    }
    match line.split_once(char::is_whitespace) {
        Some(("/save", file)) => ChatInput::Save(PathBuf::from(file.trim())),
        _ => match line {
            "/save" => ChatInput::Save(PathBuf::from(DEFAULT_EXPORT_FILE)),
            "/quit" | "/exit" => ChatInput::Quit,
            _ => ChatInput::Question(line.to_string()),
        },
    }
}
