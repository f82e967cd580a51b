use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::constants::{
    ENV_CONFIG, ENV_DEBUG, ENV_HOST, ENV_PORT, ENV_RATE_LIMIT_MAX_ATTEMPTS,
    ENV_RATE_LIMIT_WINDOW_SECS, ENV_SECURE_COOKIE, ENV_SESSION_TTL, ENV_STATIC_DIR,
};

#[derive(Parser)]
#[command(name = "dashgate")]
#[command(version, about = "Self-hosted dashboard with an authentication gateway", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Enable debug logging
    #[arg(long, global = true, env = ENV_DEBUG)]
    pub debug: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Directory with the dashboard frontend build
    #[arg(long, global = true, env = ENV_STATIC_DIR)]
    pub static_dir: Option<PathBuf>,

    /// Mark the session cookie `Secure` (set when served over HTTPS)
    #[arg(long, global = true, env = ENV_SECURE_COOKIE)]
    pub secure_cookie: Option<bool>,

    /// Session lifetime, e.g. 30m, 12h, 7d, 2w
    #[arg(long, global = true, env = ENV_SESSION_TTL)]
    pub session_ttl: Option<String>,

    /// Login/setup attempts allowed per source within the window
    #[arg(long, global = true, env = ENV_RATE_LIMIT_MAX_ATTEMPTS)]
    pub rate_limit_max_attempts: Option<u32>,

    /// Rate limit window in seconds
    #[arg(long, global = true, env = ENV_RATE_LIMIT_WINDOW_SECS)]
    pub rate_limit_window_secs: Option<u64>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default command)
    Start,
    /// Print an Argon2id hash for use as `password_hash` in the config file
    HashPassword {
        /// Password to hash; read from stdin when omitted
        password: Option<String>,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub debug: bool,
    pub config: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub secure_cookie: Option<bool>,
    pub session_ttl: Option<String>,
    pub rate_limit_max_attempts: Option<u32>,
    pub rate_limit_window_secs: Option<u64>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        debug: cli.debug,
        config: cli.config,
        static_dir: cli.static_dir,
        secure_cookie: cli.secure_cookie,
        session_ttl: cli.session_ttl,
        rate_limit_max_attempts: cli.rate_limit_max_attempts,
        rate_limit_window_secs: cli.rate_limit_window_secs,
    };
    (config, cli.command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_flags() {
        let cli = Cli::try_parse_from([
            "dashgate",
            "--port",
            "8080",
            "--session-ttl",
            "7d",
            "--secure-cookie",
            "true",
        ])
        .unwrap();
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.session_ttl.as_deref(), Some("7d"));
        assert_eq!(cli.secure_cookie, Some(true));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_hash_password_command() {
        let cli = Cli::try_parse_from(["dashgate", "hash-password", "hunter22!"]).unwrap();
        match cli.command {
            Some(Commands::HashPassword { password }) => {
                assert_eq!(password.as_deref(), Some("hunter22!"))
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
