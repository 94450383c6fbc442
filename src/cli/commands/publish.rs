use anyhow::{anyhow, Context};
use url::Url;
use clap::Args;
use serde_json::Value;

use crate::cli::OutputFormat;
use crate::tenant::TENANT_HINT_HEADER;

#[derive(Args)]
pub struct PublishArgs {
    #[arg(long, default_value = "http://localhost:3000", help = "Gateway base URL")]
    pub url: String,
    #[arg(long, env = "CAREWATCH_TOKEN", help = "Bearer token")]
    pub token: String,
    #[arg(long, help = "Tenant hint for identities without a bound tenant")]
    pub tenant: Option<String>,
    #[arg(long, help = "Channel namespace")]
    pub namespace: Option<String>,
    #[arg(help = "Channel name")]
    pub channel: String,
    #[arg(help = "JSON payload")]
    pub payload: String,
}

pub async fn handle(args: PublishArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let payload: Value = serde_json::from_str(&args.payload).context("payload must be valid JSON")?;

    let url = publish_url(&args.url, &args.channel, args.namespace.as_deref())?;

    let mut request = reqwest::Client::new()
        .post(url)
        .bearer_auth(&args.token)
        .json(&payload);
    if let Some(tenant) = &args.tenant {
        request = request.header(TENANT_HINT_HEADER, tenant);
    }

    let response = request.send().await?;
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    if !status.is_success() {
        anyhow::bail!("gateway returned {}: {}", status, body["message"].as_str().unwrap_or("unknown error"));
    }

    match output_format {
        OutputFormat::Json => println!("{}", body),
        OutputFormat::Text => println!("delivered to {} listener(s)", body["data"]["delivered"]),
    }
    Ok(())
}

/// `<base>/api/realtime/<channel>`, keeping any path prefix on the base and
/// percent-encoding the channel as a single segment.
fn publish_url(base: &str, channel: &str, namespace: Option<&str>) -> anyhow::Result<Url> {
    let mut url = Url::parse(base).context("invalid gateway URL")?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("gateway URL cannot carry a path: {}", base))?
        .pop_if_empty()
        .extend(["api", "realtime", channel]);
    if let Some(namespace) = namespace {
        url.query_pairs_mut().append_pair("namespace", namespace);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_is_a_single_encoded_segment() {
        let url = publish_url("http://localhost:3000", "ward/1?x#y", None).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/realtime/ward%2F1%3Fx%23y");
    }

    #[test]
    fn base_path_prefix_is_kept() {
        let url = publish_url("https://gw.example.com/carewatch", "vitals", Some("care")).unwrap();
        assert_eq!(url.as_str(), "https://gw.example.com/carewatch/api/realtime/vitals?namespace=care");

        let url = publish_url("https://gw.example.com/carewatch/", "vitals", None).unwrap();
        assert_eq!(url.as_str(), "https://gw.example.com/carewatch/api/realtime/vitals");
    }
}
