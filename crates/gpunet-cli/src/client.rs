use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use gpunet_common::api::{CODE_DEADLINE_EXCEEDED, DEADLINE_HEADER};
use gpunet_common::ErrorBody;

/// Splits a comma-joined target list, dropping empty entries.
pub fn parse_targets(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Targets in dial order: `server` alone when given, otherwise the seed's
/// ranked list, falling back to the seed itself.
pub async fn resolve_targets(
    http: &Client,
    server: Option<&str>,
    seed: &str,
    port: u16,
) -> Result<Vec<String>> {
    if let Some(server) = server {
        return Ok(vec![server.to_string()]);
    }

    let url = format!("http://{seed}/v1/peers/targets?port={port}");
    let ranked = match http.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => parse_targets(&resp.text().await?),
        Ok(resp) => {
            tracing::warn!(seed=%seed, status=%resp.status(), "seed refused target query");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(seed=%seed, error=%e, "seed unreachable");
            Vec::new()
        }
    };

    if ranked.is_empty() {
        tracing::info!(seed=%seed, "no ranked peers, dialing seed");
        return Ok(vec![seed.to_string()]);
    }
    Ok(ranked)
}

pub struct NodeClient {
    http: Client,
    targets: Vec<String>,
    timeout: Duration,
}

impl NodeClient {
    pub fn new(http: Client, targets: Vec<String>, timeout: Duration) -> Self {
        Self {
            http,
            targets,
            timeout,
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Sends to each target in rank order until one accepts the connection.
    pub async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response> {
        let deadline_ms = self.timeout.as_millis().to_string();
        for target in &self.targets {
            let url = format!("http://{target}{path}");
            let mut req = self
                .http
                .request(method.clone(), &url)
                .timeout(self.timeout)
                .header(DEADLINE_HEADER, &deadline_ms);
            if let Some(b) = body {
                req = req.json(b);
            }

            match req.send().await {
                Ok(resp) => {
                    tracing::debug!(target=%target, status=%resp.status(), "response");
                    return Ok(resp);
                }
                Err(e) if e.is_connect() => {
                    tracing::warn!(target=%target, error=%e, "target unreachable, trying next");
                }
                Err(e) if e.is_timeout() => {
                    bail!("deadline exceeded after {}ms ({target})", self.timeout.as_millis());
                }
                Err(e) => return Err(e.into()),
            }
        }
        bail!("no reachable target among [{}]", self.targets.join(", "))
    }

    pub async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let resp = self.send(method, path, body).await?;
        decode(resp).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.call::<(), T>(Method::GET, path, None).await
    }

    #[cfg(test)]
    pub async fn get_text(&self, path: &str) -> Result<String> {
        let resp = self.send::<()>(Method::GET, path, None).await?;
        if !resp.status().is_success() {
            return Err(error_from(resp).await);
        }
        Ok(resp.text().await?)
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    if resp.status().is_success() {
        return Ok(resp.json().await?);
    }
    Err(error_from(resp).await)
}

async fn error_from(resp: Response) -> anyhow::Error {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) if body.code == CODE_DEADLINE_EXCEEDED => anyhow!("deadline exceeded: {}", body.message),
        Ok(body) => anyhow!("{} ({}): {}", body.code, status, body.message),
        Err(_) => anyhow!("request failed with {status}: {text}"),
    }
}
