// File: services/iospush_sender/src/main.rs
use clap::{Args, Parser, Subcommand};
use iospush_apns::{
    fetch_feedback, ConnectionManager, DeliveryEngine, NotificationPayload, PayloadBuilder,
    SendOptions,
};
use iospush_common::{config_error, init_with_config, validation_error, DeviceEndpoint, Environment, PushError};
use iospush_config::load_config;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "iospush-sender")]
#[command(version)]
#[command(about = "Send notifications through the APNs binary interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message to one or more device tokens
    Send(SendArgs),
    /// Drain the feedback service and print unreachable devices
    Feedback {
        #[arg(long, default_value = "sandbox")]
        environment: Environment,
        /// Client certificate PEM, overriding the configured one
        #[arg(long)]
        certificate: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SendArgs {
    #[arg(long, default_value = "sandbox")]
    environment: Environment,
    #[arg(long)]
    certificate: Option<PathBuf>,
    #[arg(long)]
    alert: String,
    #[arg(long)]
    badge: Option<u32>,
    #[arg(long)]
    sound: Option<String>,
    #[arg(long)]
    content_available: bool,
    /// Extra top-level key, as KEY=JSON (a bare string is sent as a string)
    #[arg(long = "custom", value_name = "KEY=JSON")]
    custom: Vec<String>,
    #[arg(long, default_value_t = 0)]
    identifier: u32,
    #[arg(long, default_value_t = 0)]
    expiry: u32,
    /// 64-character hex device tokens
    #[arg(required = true)]
    tokens: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    let _guard = init_with_config(&config.logging);

    let result = match cli.command {
        Commands::Send(args) => send(config.apns, args).await,
        Commands::Feedback {
            environment,
            certificate,
        } => feedback(config.apns, environment, certificate).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn send(apns: iospush_config::ApnsConfig, args: SendArgs) -> Result<(), PushError> {
    let payload = build_payload(&args)?;
    info!(size = payload.len(), "payload: {payload}");

    let endpoints: Vec<_> = args
        .tokens
        .iter()
        .map(|token| DeviceEndpoint::new(token.as_str(), args.environment))
        .collect();
    let options = SendOptions {
        identifier: args.identifier,
        expiry: args.expiry,
        certificate_path: args.certificate,
    };

    let engine = DeliveryEngine::from_config(apns);
    let reports = engine.send_many(&endpoints, &payload, &options).await;

    let mut failed = 0;
    for report in &reports {
        match report.result.error() {
            None => println!("{}\taccepted", report.token),
            Some(e) => {
                failed += 1;
                println!("{}\t{}", report.token, e);
            }
        }
    }

    if failed > 0 {
        warn!(failed, total = reports.len(), "some notifications were not accepted");
        return Err(PushError::DeliveryError(format!(
            "{failed} of {} notifications failed",
            reports.len()
        )));
    }
    Ok(())
}

fn build_payload(args: &SendArgs) -> Result<NotificationPayload, PushError> {
    let mut builder = PayloadBuilder::new(args.alert.as_str())
        .content_available(args.content_available)
        .custom_params(parse_custom(&args.custom)?);
    if let Some(badge) = args.badge {
        builder = builder.badge(badge);
    }
    if let Some(sound) = &args.sound {
        builder = builder.sound(sound.as_str());
    }
    Ok(builder.build()?)
}

fn parse_custom(pairs: &[String]) -> Result<Map<String, Value>, PushError> {
    let mut params = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| validation_error(format!("expected KEY=JSON, got {pair}")))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
        params.insert(key.to_owned(), value);
    }
    Ok(params)
}

async fn feedback(
    apns: iospush_config::ApnsConfig,
    environment: Environment,
    certificate: Option<PathBuf>,
) -> Result<(), PushError> {
    let manager = ConnectionManager::new(apns);
    manager
        .resolve_certificate(environment, certificate.as_deref())
        .map_err(|e| config_error(e.to_string()))?;

    let records = fetch_feedback(&manager, environment, certificate.as_deref()).await?;
    for record in &records {
        match record.reported_at() {
            Some(at) => println!("{}\t{}", record.token, at.to_rfc3339()),
            None => println!("{}\t{}", record.token, record.timestamp),
        }
    }
    info!(count = records.len(), %environment, "feedback drained");
    Ok(())
}
