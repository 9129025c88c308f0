use clap::Parser;
use colored::*;
use std::io::{self, Write};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use assistant_relay::cli::{apply_overrides, parse_chat_input, Args, ChatInput, Command};
use assistant_relay::client::RelayClient;
use assistant_relay::config::Config;
use assistant_relay::consumer::WidgetConfig;
use assistant_relay::{web, EventKind, OutboundEvent};

fn widget_config(relay: String, assistant: Option<String>) -> WidgetConfig {
    let config = WidgetConfig::new(relay);
    match assistant {
        Some(id) => config.with_assistant(id),
        None => config,
    }
}

/// Print events as they arrive. Deltas are flushed one by one.
fn print_event(event: &OutboundEvent) {
    match event.kind {
        EventKind::Heartbeat => {}
        EventKind::TextDelta => {
            print!("{}", event.payload);
            let _ = io::stdout().flush();
        }
        EventKind::Completion => println!(),
        EventKind::Error => {
            println!();
            eprintln!("{}", format!("Error: {}", event.payload).bright_red());
        }
    }
}

/// Export the transcript, reporting the outcome instead of failing.
fn save_and_report(client: &RelayClient, path: &Path) -> bool {
    match client.save(path) {
        Ok(()) => {
            eprintln!("{}", format!("  Saved to {}", path.display()).bright_green());
            true
        }
        Err(e) => {
            eprintln!(
                "{}",
                format!("  Could not save to {}: {}", path.display(), e).bright_red()
            );
            false
        }
    }
}

async fn chat(mut client: RelayClient) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!(
        "{}",
        "  Type a question. /save [file] exports the transcript, /quit exits.".bright_blue()
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "you>".bright_cyan().bold());
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_chat_input(&line) {
            ChatInput::Empty => continue,
            ChatInput::Quit => break,
            ChatInput::Save(path) => {
                save_and_report(&client, &path);
            }
            ChatInput::Question(question) => {
                print!("{} ", "assistant>".bright_magenta().bold());
                io::stdout().flush()?;
                client.ask(&question, print_event).await?;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("assistant_relay=info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Serve { config, port, bind } => {
            let config = apply_overrides(Config::load(config.as_deref())?, port, bind);
            web::serve(config).await?;
        }
        Command::Ask {
            question,
            relay,
            assistant,
            save,
        } => {
            let mut client = RelayClient::new(widget_config(relay, assistant));
            client.ask(&question, print_event).await?;
            if let Some(path) = save {
                client.save(&path)?;
                eprintln!("{}", format!("  Saved to {}", path.display()).bright_green());
            }
        }
        Command::Chat { relay, assistant } => {
            chat(RelayClient::new(widget_config(relay, assistant))).await?;
        }
    }
    Ok(())
}
