use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default cr-engine address (local Workers dev server)
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8787";

/// cr-dashboard - session client for cr-engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// cr-engine base URL
    #[arg(short = 'u', long, env = "API_BASE_URL", default_value = DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    /// Credentials file (JSON key-value store)
    #[arg(short = 'c', long, env = "CR_CREDENTIALS_FILE")]
    pub credentials_file: Option<String>,

    /// File receiving the mirrored auth cookie
    #[arg(long, env = "CR_COOKIE_FILE")]
    pub cookie_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Proactive refresh check interval in seconds
    #[arg(long, env = "TOKEN_REFRESH_INTERVAL", default_value = "300")]
    pub refresh_interval: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Sign in and store the session
    Signin {
        #[arg(short, long)]
        email: String,
        /// Prompted for when omitted
        #[arg(short, long, env = "CR_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account
    Signup {
        #[arg(short, long)]
        email: String,
        #[arg(short, long, env = "CR_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Extra profile metadata as JSON
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Forget the stored session
    Signout,
    /// Show the stored session
    Status,
    /// Exchange the refresh token for a new access token now
    Refresh,
    /// Send an authenticated request and print the response
    Request {
        /// HTTP method
        method: String,
        /// Path relative to the base URL
        path: String,
        /// JSON body
        #[arg(short, long)]
        data: Option<String>,
        /// Send without credentials
        #[arg(long)]
        skip_auth: bool,
    },
    /// Issue a widget API key
    WidgetKey {
        #[arg(long, default_value = "/widget/keys")]
        path: String,
    },
    /// Keep the session fresh until interrupted
    Watch,
}

#[derive(Clone, Debug)]
pub struct Config {
    // cr-engine
    pub api_base_url: String,

    // Credential persistence
    pub credentials_file: PathBuf,
    pub cookie_file: Option<PathBuf>,

    // Token refresh
    pub token_refresh_threshold: u64,
    pub token_refresh_interval: u64,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Load configuration with priority: CLI > ENV > defaults.
    /// Returns the subcommand alongside.
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let command = args.command.clone();
        Ok((Self::from_args(args)?, command))
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let credentials_file = match args.credentials_file {
            Some(path) => expand_tilde(&path),
            None => default_credentials_file()
                .context("Cannot locate a config directory; set CR_CREDENTIALS_FILE")?,
        };

        Ok(Config {
            api_base_url: args.api_base_url.trim_end_matches('/').to_string(),

            credentials_file,
            cookie_file: args.cookie_file.map(|s| expand_tilde(&s)),

            token_refresh_threshold: env_or("TOKEN_REFRESH_THRESHOLD", 300),
            token_refresh_interval: args.refresh_interval,

            http_max_connections: env_or("HTTP_MAX_CONNECTIONS", 20),
            http_connect_timeout: env_or("HTTP_CONNECT_TIMEOUT", 10),
            http_request_timeout: args.http_timeout,

            log_level: args.log_level,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            anyhow::bail!(
                "API_BASE_URL must start with http:// or https://: {}",
                self.api_base_url
            );
        }
        if self.token_refresh_interval == 0 {
            anyhow::bail!("TOKEN_REFRESH_INTERVAL must be greater than zero");
        }
        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }
        Ok(())
    }
}

/// Parse an env var, falling back to `default` when unset or invalid
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// `~/.config/cr-dashboard/credentials.json` (platform equivalent)
fn default_credentials_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cr-dashboard").join("credentials.json"))
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
