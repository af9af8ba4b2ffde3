//! Packup CLI - passwordless sign-in and trips from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Email a sign-in link
//! packup login ada@example.com
//!
//! # Finish signing in with the link from the email
//! packup signin 'https://packup.app/signin?mode=signIn&oobCode=...'
//!
//! # Create an account (the username is checked first)
//! packup signup --email ada@example.com --name "Ada Lovelace" --username ada
//!
//! # List your trips
//! packup trips
//! ```
//!
//! Configuration is read from the environment (see `packup_client::config`).

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use packup_client::{ClientConfig, PackupClient};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod prompt;

use commands::CliError;

#[derive(Parser)]
#[command(name = "packup")]
#[command(author, version, about = "Packup command-line client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Email a sign-in link
    Login {
        /// Email address to sign in with
        email: String,
    },
    /// Complete sign-in with the link from the email
    Signin {
        /// The full link
        url: String,
    },
    /// Create an account and email its first sign-in link
    Signup {
        #[arg(short, long)]
        email: String,

        /// Display name (3-100 characters)
        #[arg(short, long)]
        name: String,

        /// Username (3-30 letters and digits)
        #[arg(short, long)]
        username: String,
    },
    /// Check whether a username is available
    Username {
        candidate: String,
    },
    /// List your active trips
    Trips,
    /// Show the signed-in user
    Whoami,
    /// Sign out on this device
    Logout,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &ClientConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => exit_with(&e.to_string()),
    };

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "packup_client=info,packup_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    if let Err(e) = run(cli, &config).await {
        if let CliError::Client(err) = &e {
            err.report();
        }
        exit_with(&e.user_message());
    }
}

async fn run(cli: Cli, config: &ClientConfig) -> Result<(), CliError> {
    let client = PackupClient::from_config(config)?;
    client.start()?;

    match cli.command {
        Commands::Login { email } => commands::auth::login(&client, &email).await?,
        Commands::Signin { url } => commands::auth::signin(&client, &url).await?,
        Commands::Signup {
            email,
            name,
            username,
        } => commands::signup::signup(&client, &email, &name, &username).await?,
        Commands::Username { candidate } => {
            commands::signup::check_username(&client, &candidate).await;
        }
        Commands::Trips => commands::trips::list(&client).await?,
        Commands::Whoami => commands::auth::whoami(&client).await?,
        Commands::Logout => commands::auth::logout(&client).await?,
    }
    Ok(())
}

#[allow(clippy::print_stderr)]
fn exit_with(message: &str) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}
