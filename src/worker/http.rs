//! Minimal request/response model shared by the worker, the API client and
//! the connectivity probe.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: Vec::new(),
    }
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_uppercase();
    self
  }

  pub fn header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self::new(status, value.to_string()).with_header("content-type", "application/json")
  }

  /// Response handed out when neither network nor cache could serve a request.
  pub fn degraded(error: &str) -> Self {
    Self::json(
      503,
      &serde_json::json!({
        "success": false,
        "error": error,
        "timestamp": Utc::now().to_rfc3339(),
      }),
    )
  }

  pub fn forbidden() -> Self {
    Self::new(403, "Blocked").with_header("content-type", "text/plain")
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header_value(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Failed to parse response body: {}", e))
  }
}

/// Something that can turn a request into a response.
///
/// `Err` means the request never got an answer (connection refused, DNS,
/// timeout). HTTP error statuses are successful fetches.
pub trait Fetch: Send + Sync {
  fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response>>;
}

/// Plain network access over reqwest.
#[derive(Clone)]
pub struct HttpFetch {
  client: reqwest::Client,
}

impl HttpFetch {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("sigwatch/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

impl Fetch for HttpFetch {
  fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response>> {
    let client = self.client.clone();
    Box::pin(async move {
      let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", request.method, e))?;
      let url = request.url.to_string();

      let mut builder = client.request(method, request.url);
      for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
      }

      let response = builder
        .send()
        .await
        .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();
      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body from {}: {}", url, e))?
        .to_vec();

      Ok(Response {
        status,
        headers,
        body,
      })
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_degraded_shape() {
    let response = Response::degraded("offline");
    assert_eq!(response.status, 503);
    assert_eq!(response.header_value("Content-Type"), Some("application/json"));

    let body: serde_json::Value = response.parse_json().unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "offline");
    assert!(body["timestamp"].is_string());
  }

  #[test]
  fn test_success_range() {
    assert!(Response::new(204, "").is_success());
    assert!(!Response::new(304, "").is_success());
    assert!(!Response::new(500, "").is_success());
  }

  #[test]
  fn test_method_normalized() {
    let url = Url::parse("https://example.com/").unwrap();
    let request = Request::get(url).with_method("post");
    assert_eq!(request.method, "POST");
    assert!(!request.is_get());
  }
}
