//! snsbridge - local SNS-to-Lambda development bridge
//!
//! Subscribes a publicly tunneled local endpoint to an SNS topic and
//! dispatches every delivered notification to a locally built handler
//! library, emulating a Lambda invocation.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use snsbridge_handler::{HandlerKind, HandlerRegistry, ReloadPolicy};
use snsbridge_router::RouterState;
use snsbridge_server::BridgeServer;
use snsbridge_sns::{Credentials, SnsClient, TopicArn};
use snsbridge_subscribe::{
    release_subscription, SubscriptionConfig, SubscriptionManager, SubscriptionStore,
};
use snsbridge_tunnel::TunnelAgent;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// snsbridge - receive SNS notifications locally and invoke a Lambda-style handler
#[derive(Parser, Debug)]
#[command(name = "snsbridge")]
#[command(about = "snsbridge - receive SNS notifications locally and invoke a Lambda-style handler")]
#[command(version)]
#[command(long_about = r#"
snsbridge subscribes a publicly tunneled local endpoint to an SNS topic and
dispatches every delivered notification to a handler library built as a
cdylib, emulating an SNS-triggered Lambda invocation during development.

A tunnel agent (e.g. ngrok) must already be running and forwarding to the
bridge's bind address; its control API is queried at startup for the public
callback URL.

EXAMPLES:
  # Subscribe and dispatch to the built-in logging handler
  snsbridge --topic-arn arn:aws:sns:eu-west-1:123456789012:orders

  # Dispatch to main() exported by ./handlers/echo.so, reloading on change
  snsbridge --topic-arn $SNS_TOPIC_ARN \
    --lambda-src ./handlers \
    --lambda-handler echo.main \
    --handler-reload on-change

ENVIRONMENT VARIABLES:
  SNS_TOPIC_ARN     Topic ARN to subscribe to
  LAMBDA_SRC        Directory containing the handler library
  LAMBDA_HANDLER    Dotted <module>.<function> handler path
  NGROK_ENDPOINT    Tunnel agent control API base URL
  SNS_ENDPOINT      SNS endpoint override (e.g. a localstack URL)
  AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY / AWS_SESSION_TOKEN
                    Credentials used to sign SNS requests
"#)]
struct Args {
    /// SNS topic ARN to subscribe to
    #[arg(long, env = "SNS_TOPIC_ARN")]
    topic_arn: String,

    /// Directory containing the handler library
    #[arg(long, env = "LAMBDA_SRC", default_value = ".")]
    lambda_src: PathBuf,

    /// Dotted <module>.<function> handler path; defaults to a built-in
    /// handler that logs each event
    #[arg(long, env = "LAMBDA_HANDLER")]
    lambda_handler: Option<String>,

    /// Tunnel agent control API base URL
    #[arg(long, env = "NGROK_ENDPOINT", default_value = "http://host.docker.internal:4040")]
    ngrok_endpoint: String,

    /// SNS endpoint override (defaults to the topic's regional endpoint)
    #[arg(long, env = "SNS_ENDPOINT")]
    sns_endpoint: Option<String>,

    /// When the handler library is reloaded
    #[arg(long, env = "HANDLER_RELOAD", value_enum, default_value_t = ReloadArg::EveryInvocation)]
    handler_reload: ReloadArg,

    /// Address to bind the local server
    #[arg(long, default_value = "0.0.0.0:5000")]
    bind: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReloadArg {
    /// Reload the handler library on every notification
    EveryInvocation,
    /// Reload only when the library file changes
    OnChange,
}

impl From<ReloadArg> for ReloadPolicy {
    fn from(arg: ReloadArg) -> Self {
        match arg {
            ReloadArg::EveryInvocation => ReloadPolicy::EveryInvocation,
            ReloadArg::OnChange => ReloadPolicy::OnChange,
        }
    }
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    info!("snsbridge starting...");
    let http = reqwest::Client::new();

    // Resolve the public callback endpoint from the local tunnel agent.
    // Serving with a broken callback endpoint is worse than not starting.
    let agent = TunnelAgent::new(args.ngrok_endpoint.clone(), http.clone());
    let public_url = match agent.public_url().await {
        Ok(url) => url,
        Err(err) => {
            error!("Failed to query tunnel agent on {}: {err:#}", args.ngrok_endpoint);
            std::process::exit(1);
        }
    };
    info!("Tunnel public endpoint is: {public_url}");

    let topic = match TopicArn::parse(&args.topic_arn) {
        Ok(topic) => topic,
        Err(err) => {
            error!("The provided Topic ARN ({}) is invalid: {err}", args.topic_arn);
            std::process::exit(1);
        }
    };

    let credentials = Credentials::from_env();
    if credentials.is_none() {
        warn!("No AWS credentials in the environment; SNS requests will be unsigned");
    }
    let sns = match SnsClient::new(topic.region(), args.sns_endpoint, credentials, http.clone()) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            error!("Invalid SNS endpoint configuration: {err}");
            std::process::exit(1);
        }
    };

    let handler = match &args.lambda_handler {
        Some(dotted) => HandlerKind::Dynamic(dotted.clone()),
        None => HandlerKind::Default,
    };
    let registry = Arc::new(HandlerRegistry::new(
        args.lambda_src.clone(),
        args.handler_reload.into(),
    ));

    let store = SubscriptionStore::new();
    let state = Arc::new(RouterState {
        topic: topic.clone(),
        registry,
        handler,
        store: store.clone(),
        http: http.clone(),
    });

    info!("Bridge initialized with SNS {}", topic);
    info!(
        "Lambda handler set to '{}' (source {})",
        args.lambda_handler.as_deref().unwrap_or("<built-in logger>"),
        args.lambda_src.display()
    );

    let (ready_tx, ready_rx) = watch::channel(false);

    let manager = SubscriptionManager::new(
        SubscriptionConfig {
            topic,
            callback_endpoint: public_url,
            health_url: format!("http://127.0.0.1:{}/status", args.bind.port()),
            poll_interval: Duration::from_millis(250),
        },
        sns.clone(),
        http,
        ready_rx,
    );
    let mut manager_task = tokio::spawn(manager.run());

    let server = BridgeServer::new(args.bind, state);
    let mut server_task = tokio::spawn(server.serve(ready_tx));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome: Result<()> = async {
        // Phase one: the subscription task is still running.
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
                return Ok(());
            }
            result = &mut server_task => {
                return handle_server_exit(result);
            }
            result = &mut manager_task => {
                match result {
                    Ok(Ok(subscription_arn)) => {
                        info!("Subscription requested; awaiting provider confirmation ({subscription_arn})");
                    }
                    Ok(Err(err)) => {
                        // Configuration error, not a runtime condition to retry.
                        error!("Subscription failed: {err:#}");
                        std::process::exit(1);
                    }
                    Err(err) => {
                        error!("Subscription task panicked: {err}");
                        std::process::exit(1);
                    }
                }
            }
        }

        // Phase two: serve until Ctrl+C or server failure.
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
                Ok(())
            }
            result = &mut server_task => handle_server_exit(result),
        }
    }
    .await;

    // Release the subscription if the confirmation handshake ever recorded
    // one; a handle-less shutdown is a no-op.
    release_subscription(&store, &sns).await;

    info!("snsbridge stopped");
    outcome
}

fn handle_server_exit(
    result: std::result::Result<
        std::result::Result<(), snsbridge_server::ServerError>,
        tokio::task::JoinError,
    >,
) -> Result<()> {
    match result {
        Ok(Ok(())) => {
            error!("Server exited unexpectedly");
            anyhow::bail!("server exited unexpectedly")
        }
        Ok(Err(err)) => {
            error!("Server error: {err:#}");
            Err(err.into())
        }
        Err(err) => {
            error!("Server task panicked: {err}");
            Err(err.into())
        }
    }
}
