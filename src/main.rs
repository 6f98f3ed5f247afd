use anyhow::{Context, Result};
use dialoguer::Password;
use reqwest::Method;
use std::sync::Arc;

use session_gateway::auth::SqliteStore;
use session_gateway::config::{Command, Config, LogFormat};
use session_gateway::Session;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, command) = Config::load()?;

    init_logging(&config);

    tracing::debug!("Backend: {}", config.api_base_url);
    tracing::debug!("Credential store: {}", config.credential_db_file.display());

    let store = Arc::new(
        SqliteStore::open(&config.credential_db_file).context("Failed to open credential store")?,
    );
    let session = Session::new(&config, store)?;

    if let Some(expires_at) = session.restore()? {
        tracing::debug!("Restored session, access token expires {}", expires_at.to_rfc3339());
    }

    match command {
        Command::Login { identifier, secret } => {
            let secret = match secret {
                Some(secret) => secret,
                None => Password::new()
                    .with_prompt("Secret")
                    .interact()
                    .context("Failed to read secret")?,
            };

            let expires_at = session.login(&identifier, &secret).await?;
            println!("✅ Logged in as {}", identifier);
            println!("   Access token expires: {}", expires_at.to_rfc3339());
        }

        Command::Request { method, path, body } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;
            let body = body
                .map(|b| serde_json::from_str::<serde_json::Value>(&b))
                .transpose()
                .context("Request body is not valid JSON")?;

            let response = session.client().request(method, &path, body, None).await?;
            let status = response.status();
            let text = response
                .text()
                .await
                .context("Failed to read response body")?;

            eprintln!("{}", status);
            println!("{}", text);
        }

        Command::Logout => {
            if session.logout() {
                println!("Logged out");
            } else {
                println!("No active session");
            }
        }

        Command::Status => match session.manager().expires_at() {
            Some(expires_at) => {
                println!("Session active");
                println!("   Access token expires: {}", expires_at.to_rfc3339());
            }
            None => println!("No active session"),
        },
    }

    Ok(())
}

/// Initialize logging with the configured level and format
fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
