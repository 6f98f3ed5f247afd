use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Session Gateway - authenticated HTTP session client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Backend base URL
    #[arg(short = 'u', long, env = "API_BASE_URL", default_value = "http://127.0.0.1:8000")]
    pub base_url: String,

    /// Path to the SQLite credential store
    #[arg(
        short = 'd',
        long,
        env = "CREDENTIAL_DB_FILE",
        default_value = "~/.session-gateway/credentials.db"
    )]
    pub db_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Seconds before access token expiry at which it is proactively refreshed
    #[arg(long, env = "REFRESH_SAFETY_MARGIN", default_value = "60")]
    pub refresh_margin: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Log in and store the issued credentials
    Login {
        /// Account identifier (email or username)
        #[arg(short, long)]
        identifier: String,

        /// Account secret; prompted for when omitted
        #[arg(short, long, env = "SESSION_SECRET", hide_env_values = true)]
        secret: Option<String>,
    },

    /// Send an authenticated request and print the response body
    Request {
        /// HTTP method
        method: String,

        /// Path relative to the base URL
        path: String,

        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,
    },

    /// End the session and delete stored credentials
    Logout,

    /// Show whether a session is stored and when it expires
    Status,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Backend
    pub api_base_url: String,

    // Credential storage
    pub credential_db_file: PathBuf,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Token lifecycle
    pub refresh_safety_margin: u64,

    // Authentication endpoints
    pub login_path: String,
    pub refresh_path: String,
    pub register_path: String,
    pub password_reset_path: String,
    /// Requests to these paths are sent without an Authorization header
    pub auth_endpoints: Vec<String>,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        let login_path = "/auth/login".to_string();
        let refresh_path = "/auth/refresh".to_string();
        let register_path = "/auth/register".to_string();
        let password_reset_path = "/auth/password-reset".to_string();
        let auth_endpoints = vec![
            login_path.clone(),
            refresh_path.clone(),
            register_path.clone(),
            password_reset_path.clone(),
        ];

        Self {
            api_base_url: "http://127.0.0.1:8000".to_string(),
            credential_db_file: expand_tilde("~/.session-gateway/credentials.db"),
            http_max_connections: 20,
            http_connect_timeout: 10,
            http_request_timeout: 30,
            refresh_safety_margin: 60,
            login_path,
            refresh_path,
            register_path,
            password_reset_path,
            auth_endpoints,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let config = Self::from_args(&args)?;
        Ok((config, args.command))
    }

    /// Build configuration from parsed CLI arguments and environment-only settings
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let defaults = Config::default();

        let login_path = env_path("AUTH_LOGIN_PATH").unwrap_or(defaults.login_path);
        let refresh_path = env_path("AUTH_REFRESH_PATH").unwrap_or(defaults.refresh_path);
        let register_path = env_path("AUTH_REGISTER_PATH").unwrap_or(defaults.register_path);
        let password_reset_path =
            env_path("AUTH_PASSWORD_RESET_PATH").unwrap_or(defaults.password_reset_path);

        let auth_endpoints = match std::env::var("AUTH_ENDPOINTS") {
            Ok(list) => parse_endpoint_list(&list),
            Err(_) => vec![
                login_path.clone(),
                refresh_path.clone(),
                register_path.clone(),
                password_reset_path.clone(),
            ],
        };

        let config = Config {
            api_base_url: args.base_url.trim_end_matches('/').to_string(),

            credential_db_file: expand_tilde(&args.db_file),

            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.http_max_connections),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.http_connect_timeout),

            http_request_timeout: args.http_timeout,

            refresh_safety_margin: args.refresh_margin,

            login_path,
            refresh_path,
            register_path,
            password_reset_path,
            auth_endpoints,

            log_level: args.log_level.clone(),
            log_format: parse_log_format(&args.log_format),
        };

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.api_base_url.starts_with("http://") || self.api_base_url.starts_with("https://"))
        {
            anyhow::bail!(
                "API_BASE_URL must be an http(s) URL, got '{}'",
                self.api_base_url
            );
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        if self.auth_endpoints.is_empty() {
            anyhow::bail!("AUTH_ENDPOINTS must name at least one path");
        }

        Ok(())
    }
}

fn env_path(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|s| normalize_path(&s))
}

/// Ensure a leading slash and no trailing slash
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Parse a comma-separated list of endpoint paths
fn parse_endpoint_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(normalize_path)
        .collect()
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        // Just "~" without slash should not expand
        let path = expand_tilde("~");
        assert_eq!(path, PathBuf::from("~"));
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!(parse_log_format("json"), LogFormat::Json);
        assert_eq!(parse_log_format("JSON"), LogFormat::Json);
        assert_eq!(parse_log_format("text"), LogFormat::Text);
        assert_eq!(parse_log_format(""), LogFormat::Text);
    }

    #[test]
    fn test_parse_endpoint_list() {
        assert_eq!(
            parse_endpoint_list("/auth/login, auth/refresh ,,/auth/register/"),
            vec!["/auth/login", "/auth/refresh", "/auth/register"]
        );
        assert!(parse_endpoint_list(" , ").is_empty());
    }

    #[test]
    fn test_default_auth_endpoints() {
        let config = Config::default();
        assert_eq!(
            config.auth_endpoints,
            vec![
                "/auth/login",
                "/auth/refresh",
                "/auth/register",
                "/auth/password-reset"
            ]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.api_base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.http_request_timeout = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.auth_endpoints.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_parsing() {
        let args = CliArgs::try_parse_from([
            "session-gateway",
            "--base-url",
            "https://api.example.com/",
            "request",
            "GET",
            "/events",
        ])
        .unwrap();

        assert_eq!(args.base_url, "https://api.example.com/");
        match args.command {
            Command::Request { method, path, body } => {
                assert_eq!(method, "GET");
                assert_eq!(path, "/events");
                assert!(body.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
