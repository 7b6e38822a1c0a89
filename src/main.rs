use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use learnlab_client::api::{ChatMessage, CoachApi, LibrariesApi, ModuleSessionsApi};
use learnlab_client::jwt;
use learnlab_client::telemetry::{BatchSettings, InteractionBatcher, InteractionRecord};
use learnlab_client::toast::ToastCenter;
use learnlab_client::{AuthClient, ClientError, Config};

/// LearnLab client - sign in and talk to the LearnLab API from the terminal
#[derive(Parser, Debug)]
#[command(name = "learnlab", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API base URL (overrides the configuration file)
    #[arg(long)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session tokens
    Login {
        #[arg(short, long)]
        email: String,
        /// Password (falls back to LEARNLAB_PASSWORD)
        #[arg(short, long, env = "LEARNLAB_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Revoke the session and forget the stored tokens
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Ask the server whether the session is still valid
    Verify,
    /// Decode a JWT locally without verifying its signature
    Decode { token: String },
    /// List the user's libraries
    Libraries,
    /// Ask the learning coach a question
    Chat {
        message: String,
        /// Module the question is about
        #[arg(short, long)]
        module: Option<String>,
    },
    /// Record a single widget interaction against a module session
    Track {
        #[arg(long)]
        session: String,
        #[arg(long)]
        widget: String,
        #[arg(long, default_value = "generic")]
        widget_type: String,
        #[arg(long)]
        action: String,
        /// Free-form JSON payload
        #[arg(long, default_value = "{}")]
        data: String,
    },
}

fn load_config(args: &Args) -> Result<Config, ClientError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .with_env_overrides();
    if let Some(url) = &args.api_url {
        config.api.base_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

fn decode(token: &str) -> Result<(), ClientError> {
    match jwt::decode(token) {
        Some(claims) => {
            println!("{}", serde_json::to_string_pretty(&claims)?);
            println!("valid: {}", jwt::is_token_valid(token));
        }
        None => println!("not a decodable JWT"),
    }
    Ok(())
}

async fn run(args: Args) -> Result<(), ClientError> {
    let config = load_config(&args)?;
    let command = match args.command {
        Command::Decode { token } => return decode(&token),
        other => other,
    };

    let client = AuthClient::from_config(&config)?;
    client.restore().await?;

    match command {
        Command::Login { email, password } => {
            let user = client.login(&email, &password).await?;
            println!("signed in as {}", user.email.as_deref().unwrap_or(&user.id));
        }
        Command::Logout => {
            client.logout().await;
            println!("signed out");
        }
        Command::Whoami => match client.current_user() {
            Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
            None => println!("not signed in"),
        },
        Command::Verify => {
            let body = client.verify().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::Libraries => {
            for lib in LibrariesApi::new(client).list().await? {
                println!("{}\t{}\t{} modules", lib.id, lib.name, lib.module_ids.len());
            }
        }
        Command::Chat { message, module } => {
            let context = module.map(|m| serde_json::json!({ "module_id": m }));
            let reply = CoachApi::new(client)
                .chat(&[ChatMessage::user(message)], context)
                .await?;
            println!("{}", reply);
        }
        Command::Track {
            session,
            widget,
            widget_type,
            action,
            data,
        } => {
            let data = serde_json::from_str(&data)?;
            let sink = Arc::new(ModuleSessionsApi::new(client));
            let (batcher, handle) =
                InteractionBatcher::spawn(sink, BatchSettings::from(&config.telemetry));
            batcher.start_session(session).await?;
            batcher
                .track(InteractionRecord::new(widget, widget_type, action, data))
                .await?;
            let sent = batcher.shutdown().await?;
            if let Err(e) = handle.await {
                warn!(error = %e, "interaction batcher task failed");
            }
            println!("delivered {} interaction(s)", sent);
        }
        Command::Decode { token } => decode(&token)?,
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();
    info!(command = args.command_name(), "learnlab starting");

    if let Err(e) = run(args).await {
        let toasts = ToastCenter::new();
        toasts.notify_error(&e);
        for toast in toasts.active() {
            warn!(error = %e, "{}", toast.title);
            eprintln!("{}: {}", toast.title, toast.description.unwrap_or_default());
        }
        return Err(e.into());
    }
    Ok(())
}

impl Args {
    fn command_name(&self) -> &'static str {
        match self.command {
            Command::Login { .. } => "login",
            Command::Logout => "logout",
            Command::Whoami => "whoami",
            Command::Verify => "verify",
            Command::Decode { .. } => "decode",
            Command::Libraries => "libraries",
            Command::Chat { .. } => "chat",
            Command::Track { .. } => "track",
        }
    }
}
