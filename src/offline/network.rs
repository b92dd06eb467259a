//! Network access for the offline worker.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;

use super::types::{Request, Response, ResponseKind};

#[async_trait]
pub trait Network: Send + Sync {
  /// Perform the request. An `Err` means the network itself failed (offline,
  /// DNS, TLS); HTTP error statuses come back as `Ok` responses.
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// reqwest-backed network.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Option<url::Origin>,
}

impl HttpNetwork {
  /// `origin` is the application origin; responses from other origins are
  /// tagged as CORS responses.
  pub fn new(origin: Option<&url::Url>, timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: origin.map(|u| u.origin()),
    })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;

    let resp = self
      .client
      .request(method, request.url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Fetch failed for {}: {}", request.url, e))?;

    let status = resp.status();
    let headers = resp
      .headers()
      .iter()
      .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
      .collect();

    let kind = match &self.origin {
      Some(origin) if *origin != request.url.origin() => ResponseKind::Cors,
      _ => ResponseKind::Basic,
    };

    let body = resp
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or("").to_string(),
      kind,
      headers,
      body: body.to_vec(),
    })
  }
}

/// Network that is always unreachable.
pub struct Disconnected;

#[async_trait]
impl Network for Disconnected {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    Err(eyre!("Network unavailable: {}", request.url))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  #[tokio::test]
  async fn test_disconnected_always_fails() {
    let req = Request::get(Url::parse("https://app.example/").unwrap());
    assert!(Disconnected.fetch(&req).await.is_err());
  }

  #[tokio::test]
  async fn test_http_network_rejects_bad_method() {
    let net = HttpNetwork::new(None, Duration::from_secs(1)).unwrap();
    let req = Request::get(Url::parse("http://127.0.0.1:9/").unwrap()).with_method("BAD METHOD");
    assert!(net.fetch(&req).await.is_err());
  }
}
