//! Terminal chat client for the relay
//!
//! Usage: `relay-chat-client [client.toml]`
//!
//! Commands in the chat screen: `/begin`, `/category`, `/home`, `/quit`.

use std::io::Write;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_chat::client::RelayClient;
use relay_chat::config::ClientConfig;
use relay_chat::conversation::{Category, ChatMessage, Conversation, Screen};

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_chat=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("client.toml"));
    let config = ClientConfig::load_or_default(&path)?;

    let relay = RelayClient::new(&config.relay_url);
    let mut conversation = Conversation::new(config.category);
    if let Some(user) = &config.user {
        conversation = conversation.with_user(user.clone());
    }

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match conversation.screen() {
            Screen::CategorySelect => {
                if !choose_category(&mut conversation, &mut input).await? {
                    break;
                }
                conversation.start_chat();
                for msg in conversation.messages() {
                    println!("\nassistant> {}", msg.text);
                }
                println!("(type /begin to start)");
            }
            Screen::Chat => {
                print!("\nyou> ");
                std::io::stdout().flush()?;

                let Some(line) = input.next_line().await? else {
                    break;
                };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/home" => conversation.reset_to_initial(),
                    "/category" => conversation.back_to_categories(),
                    "/begin" => {
                        print!("assistant> ");
                        let mut printed = 0;
                        conversation
                            .begin(&relay, |msg| render(msg, &mut printed))
                            .await;
                        finish(&conversation);
                    }
                    text => {
                        print!("assistant> ");
                        let mut printed = 0;
                        conversation
                            .send(&relay, text, |msg| render(msg, &mut printed))
                            .await;
                        finish(&conversation);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Returns `false` when input is exhausted or the user quits
async fn choose_category(
    conversation: &mut Conversation,
    input: &mut Input,
) -> anyhow::Result<bool> {
    loop {
        println!("\nChoose a question category:");
        for (i, category) in Category::ALL.iter().enumerate() {
            let marker = if *category == conversation.category() {
                "*"
            } else {
                " "
            };
            println!(
                " {}{}. {} - {}",
                marker,
                i + 1,
                category.label(),
                category.description()
            );
        }
        print!("category [{}]> ", conversation.category().wire_value());
        std::io::stdout().flush()?;

        let Some(line) = input.next_line().await? else {
            return Ok(false);
        };
        let choice = line.trim();
        if choice == "/quit" {
            return Ok(false);
        }

        let category = match choice.parse::<usize>() {
            Ok(n) if (1..=Category::ALL.len()).contains(&n) => Some(Category::ALL[n - 1]),
            _ if choice.is_empty() => Some(conversation.category()),
            _ => Category::from_wire(choice),
        };

        match category {
            Some(category) => {
                conversation.select_category(category);
                return Ok(true);
            }
            None => println!("Unknown category '{}'", choice),
        }
    }
}

/// Print only the text that arrived since the last update
fn render(msg: &ChatMessage, printed: &mut usize) {
    if msg.text.len() < *printed || !msg.text.is_char_boundary(*printed) {
        print!("\n{}", msg.text);
    } else {
        print!("{}", &msg.text[*printed..]);
    }
    *printed = msg.text.len();
    let _ = std::io::stdout().flush();
}

fn finish(conversation: &Conversation) {
    println!();
    if let Some(error) = conversation.last_error() {
        eprintln!("error: {}", error);
    }
}
