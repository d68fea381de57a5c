//! ragbot-cli: terminal client for the chatbot HTTP API
//!
//! # Subcommands
//! - `register <session_id> --name .. --job .. --company .. --country ..`
//! - `ask <session_id> <question...>` : prints the answer (or refusal) text
//! - `status [session_id]`             : server liveness, or one session's diagnostics

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "ragbot-cli", version, about = "Chat with the ragbot HTTP API")]
struct Cli {
    /// Chatbot HTTP server URL (overrides RAGBOT_HTTP_URL env var)
    #[arg(long, env = "RAGBOT_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Register (or re-register) a session, resetting its question quota
    Register {
        session_id: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        job: String,

        #[arg(long)]
        company: String,

        #[arg(long)]
        country: String,
    },

    /// Ask a question in a registered session
    Ask {
        session_id: String,

        /// Question text; several words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },

    /// Show server liveness, or the state of one session
    Status { session_id: Option<String> },
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct RegisterBody<'a> {
    pub session_id: &'a str,
    pub name: &'a str,
    pub job: &'a str,
    pub company: &'a str,
    pub country: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AskBody<'a> {
    pub session_id: &'a str,
    pub question: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct AskResponse {
    pub answer: String,
}

/// Body of GET /sessions/:session_id
#[derive(Debug, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub active: bool,
    #[serde(default)]
    pub activated_at: Option<String>,
    pub question_count: u32,
    pub max_questions: u32,
    pub messages: i64,
}

pub fn format_session_status(status: &SessionStatus) -> String {
    let state = if status.active { "active" } else { "inactive" };
    format!(
        "Session:   {}\nState:     {}\nActivated: {}\nQuestions: {}/{}\nMessages:  {}",
        status.session_id,
        state,
        status.activated_at.as_deref().unwrap_or("never"),
        status.question_count,
        status.max_questions,
        status.messages
    )
}

/// Pull the `error` field out of an error body, falling back to the raw text.
pub fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

fn fail_on_status(resp: reqwest::blocking::Response) -> reqwest::blocking::Response {
    if resp.status().is_success() {
        return resp;
    }
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    eprintln!("ragbot-cli: server returned {}: {}", status, error_message(&body));
    std::process::exit(1);
}

fn do_register(server: &str, body: RegisterBody<'_>) -> anyhow::Result<()> {
    let url = format!("{}/register", server);
    let resp = match client(30)?.post(&url).json(&body).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("ragbot-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    fail_on_status(resp);
    println!("Registered session {}", body.session_id);
    Ok(())
}

fn do_ask(server: &str, session_id: &str, question: &str) -> anyhow::Result<()> {
    let url = format!("{}/ask", server);
    let body = AskBody {
        session_id,
        question,
    };

    // generation can take a while; the server gives up on its own first
    let resp = match client(180)?.post(&url).json(&body).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("ragbot-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    let answer: AskResponse = fail_on_status(resp).json()?;
    println!("{}", answer.answer);
    Ok(())
}

fn do_status(server: &str, session_id: Option<&str>) -> anyhow::Result<()> {
    let client = client(10)?;

    let Some(session_id) = session_id else {
        let url = format!("{}/", server);
        match client.get(&url).send() {
            Ok(r) if r.status().is_success() => {
                let body: serde_json::Value = r.json().unwrap_or_default();
                println!("Chatbot server: {}", body["status"].as_str().unwrap_or("unknown"));
                println!("Message:        {}", body["message"].as_str().unwrap_or("?"));
            }
            Ok(r) => {
                eprintln!("ragbot-cli: server unhealthy (HTTP {})", r.status());
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("ragbot-cli: cannot reach {}: {}", url, e);
                std::process::exit(1);
            }
        }
        return Ok(());
    };

    let url = format!("{}/sessions/{}", server, session_id);
    let resp = match client.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("ragbot-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    };
    let status: SessionStatus = fail_on_status(resp).json()?;
    println!("{}", format_session_status(&status));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Register {
            session_id,
            name,
            job,
            company,
            country,
        } => do_register(
            &server,
            RegisterBody {
                session_id: &session_id,
                name: &name,
                job: &job,
                company: &company,
                country: &country,
            },
        ),
        Commands::Ask {
            session_id,
            question,
        } => do_ask(&server, &session_id, &question.join(" ")),
        Commands::Status { session_id } => do_status(&server, session_id.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("ragbot-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
