//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::auth::{HttpOidcProvider, OidcFlow, password};
use crate::api::rate_limit::SlidingWindowLimiter;
use crate::api::{ApiServer, AuthManager};
use crate::core::banner;
use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::persist::JsonConfigStore;
use crate::core::shutdown::ShutdownService;

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub auth: Arc<AuthManager>,
    pub rate_limiter: Arc<SlidingWindowLimiter>,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();

        let (cli_config, command) = cli::parse();
        Self::init_logging(cli_config.debug);

        tracing::debug!("Application starting");
        tracing::trace!(command = ?command, "Parsed command");

        match command {
            Some(Commands::HashPassword { password }) => {
                return Self::hash_password_command(password);
            }
            Some(Commands::Start) | None => {}
        }

        let app = Self::init(&cli_config)?;
        Self::start_server(app).await
    }

    fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;

        let store = Arc::new(JsonConfigStore::new(config.config_path.clone()));
        let provider =
            HttpOidcProvider::new().context("Failed to build HTTP client for the OIDC provider")?;
        let auth = AuthManager::new(
            &config.auth,
            config.snapshot.clone(),
            store,
            OidcFlow::new(Arc::new(provider)),
        )
        .context("Configuration error: auth")?;

        let rate_limiter = Arc::new(SlidingWindowLimiter::new(&config.rate_limit));

        Ok(Self {
            shutdown: ShutdownService::new(),
            config,
            auth: Arc::new(auth),
            rate_limiter,
        })
    }

    fn hash_password_command(password: Option<String>) -> Result<()> {
        let password = match password {
            Some(password) => password,
            None => {
                eprint!("Password: ");
                std::io::Write::flush(&mut std::io::stderr())?;
                let mut input = String::new();
                std::io::stdin()
                    .read_line(&mut input)
                    .context("Failed to read password from stdin")?;
                input.trim_end_matches(['\r', '\n']).to_string()
            }
        };

        password::validate_strength(&password)?;
        let hash = password::hash_password(&password)?;
        println!("{}", hash);
        Ok(())
    }

    fn init_logging(debug: bool) {
        let default_filter = if debug {
            format!("info,{}=debug", APP_NAME_LOWER)
        } else {
            format!("info,{}=info", APP_NAME_LOWER)
        };

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        app.start_background_tasks().await;

        banner::print_banner(
            &app.config.server.host,
            app.config.server.port,
            app.auth.method(),
            &app.config.config_path,
        );

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }

    pub async fn start_background_tasks(&self) {
        self.shutdown
            .register(
                self.auth
                    .sessions()
                    .start_sweep_task(self.shutdown.subscribe()),
            )
            .await;

        self.shutdown
            .register(self.rate_limiter.start_sweep_task(self.shutdown.subscribe()))
            .await;

        tracing::debug!("Background tasks started");
    }
}
