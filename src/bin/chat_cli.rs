//! Terminal client for the support chat API.
//!
//! Environment: `CHAT_URL` (default `http://localhost:3000`), `CHAT_EMAIL`
//! and `CHAT_PASSWORD`. Ctrl-C while a reply streams stops it; the partial
//! reply is still saved.

use std::io::{self, Write};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use support_chat::client::ChatClient;
use support_chat::store::Message;

// ──────────────────────────────────────────────────────────────────────────────
// SESSION
// ──────────────────────────────────────────────────────────────────────────────

struct Session {
    client: ChatClient,
    chat_id: Option<String>,
    history: Vec<Message>,
}

impl Session {
    async fn open(&mut self, chat_id: &str) -> Result<()> {
        self.history = self.client.list_messages(chat_id).await?;
        self.chat_id = Some(chat_id.to_string());
        for message in &self.history {
            println!("[{}] {}", message.role.as_str(), message.content);
        }
        Ok(())
    }

    async fn list(&self) -> Result<()> {
        let page = self.client.list_chats(1).await?;
        for chat in &page.list {
            let marker = if Some(&chat.id) == self.chat_id.as_ref() { "*" } else { " " };
            println!("{} {}  {}", marker, chat.id, chat.title);
        }
        if page.has_more {
            println!("  ...");
        }
        Ok(())
    }

    async fn send(&mut self, content: &str) -> Result<()> {
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let is_new = self.chat_id.is_none();
        let mut printed = 0;
        let result = self
            .client
            .send(
                self.chat_id.as_deref(),
                &self.history,
                content,
                |transcript| {
                    print!("{}", &transcript[printed..]);
                    let _ = io::stdout().flush();
                    printed = transcript.len();
                },
                &cancel,
            )
            .await;
        watcher.abort();
        println!();

        let outcome = result?;
        if outcome.cancelled {
            println!("(stopped)");
        }
        self.chat_id = Some(outcome.chat_id.clone());
        self.history.push(outcome.user_message);
        self.history.push(outcome.assistant_message);

        if is_new {
            match self.client.update_title(&outcome.chat_id, &self.history).await {
                Ok(title) => println!("(chat titled \"{}\")", title),
                Err(e) => eprintln!("(could not title chat: {})", e),
            }
        }
        Ok(())
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

// ──────────────────────────────────────────────────────────────────────────────
// MAIN ENTRY POINT
// ──────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let url = std::env::var("CHAT_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let email = match std::env::var("CHAT_EMAIL") {
        Ok(email) => email,
        Err(_) => prompt("Email: ")?,
    };
    let password = match std::env::var("CHAT_PASSWORD") {
        Ok(password) => password,
        Err(_) => prompt("Password: ")?,
    };

    let mut client = ChatClient::new(url.clone());
    let user = client
        .login(&email, &password)
        .await
        .with_context(|| format!("logging in to {url}"))?;
    println!("Logged in as {}. Commands: /chats, /open <id>, /new, /delete <id>, /quit", user.username);

    let mut session = Session {
        client,
        chat_id: None,
        history: Vec::new(),
    };

    loop {
        let line = prompt("> ")?;
        let (command, arg) = match line.split_once(' ') {
            Some((c, a)) => (c, a.trim()),
            None => (line.as_str(), ""),
        };

        let result = match command {
            "" => continue,
            "/quit" | "/exit" => break,
            "/chats" => session.list().await,
            "/open" if !arg.is_empty() => session.open(arg).await,
            "/new" => {
                session.chat_id = None;
                session.history.clear();
                Ok(())
            }
            "/delete" if !arg.is_empty() => {
                let deleted = session.client.delete_message(arg).await;
                session.history.retain(|m| m.id != arg);
                deleted.map_err(Into::into)
            }
            _ if command.starts_with('/') => {
                println!("Unknown command {command}");
                Ok(())
            }
            _ => session.send(&line).await,
        };

        if let Err(e) = result {
            eprintln!("Error: {e:#}");
        }
    }

    Ok(())
}
