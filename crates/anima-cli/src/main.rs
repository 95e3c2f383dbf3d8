//! Ánima CLI - sign in to Ánima from the terminal.
//!
//! This binary drives the session lifecycle from `anima-core`: it signs in
//! and out, recovers a password, reports the session state, analyzes a photo
//! and suggests music for it, and can sit on a protected location watching
//! for the session to expire.

mod commands;
mod validation;

use std::io;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use anima_core::{Config, SessionManager};

// ============================================================================
// Constants
// ============================================================================

/// Log file name in the cache directory
const LOG_FILE: &str = "anima.log";

const USAGE: &str = "\
Usage: anima [--verbose] [--ephemeral] <command> [args]

Commands:
  login [email]        Sign in (prompts for the password)
  register             Create an account and sign in
  recover [email]      Reset a forgotten password with an emailed code
  logout               Forget the stored session
  status               Show whether a session is active
  whoami               Show the signed-in user
  analyze <image>      Detect the emotion in a photo and suggest music
  recommend <emotion>  Suggest music for happy, sad, angry, relaxed or energetic
  watch [location]     Stay on a protected location until the session expires

Options:
  --verbose            Also log to stderr
  --ephemeral          Keep the session in memory only
  --inline             Send the photo as base64 JSON instead of a file upload";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to a file in the cache directory so they never interleave with
/// command output. The returned guard flushes the file on drop.
fn init_tracing(verbose: bool) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match Config::cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        Err(_) => (None, None),
    };
    let stderr_layer = verbose.then(|| fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = take_flag(&mut args, "--verbose");
    let ephemeral = take_flag(&mut args, "--ephemeral");
    let inline = take_flag(&mut args, "--inline");

    let _log_guard = init_tracing(verbose);
    info!("Ánima CLI starting");

    let Some(command) = args.first().cloned() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    let mut config = Config::load()?;
    let session = SessionManager::from_config(&config, ephemeral)?;

    let result = match command.as_str() {
        "login" => commands::login(&session, &mut config, rest.first().map(String::as_str)).await,
        "register" => commands::register(&session, &mut config).await,
        "recover" => commands::recover(&session, &config, rest.first().map(String::as_str)).await,
        "logout" => commands::logout(&session),
        "status" => commands::status(&session),
        "whoami" => commands::whoami(&session).await,
        "analyze" => match rest.first() {
            Some(path) => commands::analyze(&session, path, inline).await,
            None => Err(anyhow::anyhow!("analyze needs an image path")),
        },
        "recommend" => match rest.first() {
            Some(emotion) => commands::recommend(&session, emotion).await,
            None => Err(anyhow::anyhow!("recommend needs an emotion")),
        },
        "watch" => commands::watch(&session, rest.first().map(String::as_str)).await,
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => Err(anyhow::anyhow!("Unknown command '{}'\n\n{}", other, USAGE)),
    };

    info!(command = %command, ok = result.is_ok(), "Ánima CLI finished");
    result
}

/// Remove `flag` from `args`, returning whether it was present
fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|a| a != flag);
    args.len() != before
}
