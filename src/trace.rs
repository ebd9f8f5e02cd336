use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use url::Url;

use crate::models::CallerInfo;

/// Asks a Cloudflare edge who we are via `/cdn-cgi/trace`.
pub(crate) async fn fetch_caller_info(client: &Client, base: &str, timeout: Duration) -> Result<CallerInfo> {
    let base_url = Url::parse(base)?;
    let trace_url = base_url.join("/cdn-cgi/trace")?;
    let body = client
        .get(trace_url)
        .timeout(timeout)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    parse_trace(&body)
}

fn parse_trace(body: &str) -> Result<CallerInfo> {
    let mut fields: HashMap<&str, &str> = body
        .lines()
        .filter_map(|line| line.split_once('='))
        .collect();

    let ip = fields
        .remove("ip")
        .ok_or_else(|| anyhow::anyhow!("trace response has no ip field"))?;

    Ok(CallerInfo {
        ip: ip.to_string(),
        country: fields.remove("loc").map(str::to_string),
        colo: fields.remove("colo").map(str::to_string),
    })
}
