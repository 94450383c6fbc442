use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use serde_json::{json, Value};

use crate::cli::OutputFormat;
use crate::config;
use crate::realtime::{CredentialStore, RealtimeSession, WsTransport};

#[derive(Args)]
pub struct ListenArgs {
    #[arg(long, default_value = "ws://localhost:3000/realtime", help = "Realtime endpoint")]
    pub url: String,
    #[arg(long, env = "CAREWATCH_TOKEN", help = "Bearer token")]
    pub token: String,
    #[arg(long, help = "Tenant hint for identities without a bound tenant")]
    pub tenant: Option<String>,
    #[arg(required = true, help = "Channels to subscribe to")]
    pub channels: Vec<String>,
}

pub async fn handle(args: ListenArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let transport = WsTransport::new(&args.url)?;
    let credentials = CredentialStore::new(args.token, args.tenant);
    let session = RealtimeSession::spawn(config::config().realtime.clone(), Arc::new(transport), credentials);

    let subscriptions: Vec<_> = args
        .channels
        .iter()
        .map(|channel| {
            session.subscribe_fn(channel.as_str(), move |channel: &str, payload: &Value| {
                match output_format {
                    OutputFormat::Json => println!("{}", json!({ "channel": channel, "payload": payload })),
                    OutputFormat::Text => println!("[{}] {}", channel, payload),
                }
                Ok(())
            })
        })
        .collect();

    session.open().await.context("could not open realtime session")?;
    eprintln!("Listening on {} channel(s); Ctrl-C to stop", subscriptions.len());

    let mut states = session.state_changes();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                eprintln!("connection: {:?}", state);
            }
        }
    }

    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    session.close();
    Ok(())
}
