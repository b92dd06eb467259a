//! Request and response values passed through the offline worker.

use serde::{Deserialize, Serialize};
use url::Url;

/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  Document,
  Script,
  Style,
  Image,
  Manifest,
  Video,
  Audio,
  #[default]
  Other,
}

impl Destination {
  /// Best guess from the path extension, for requests that do not say.
  pub fn for_url(url: &Url) -> Self {
    let path = url.path();
    if path.ends_with('/') {
      return Self::Document;
    }
    let ext = path
      .rsplit_once('.')
      .map(|(_, ext)| ext.to_ascii_lowercase())
      .unwrap_or_default();
    match ext.as_str() {
      "html" | "htm" => Self::Document,
      "js" | "mjs" => Self::Script,
      "css" => Self::Style,
      "png" | "jpg" | "jpeg" | "gif" | "svg" | "ico" | "webp" => Self::Image,
      "json" | "webmanifest" => Self::Manifest,
      "mp4" | "webm" | "mov" => Self::Video,
      "mp3" | "ogg" | "wav" => Self::Audio,
      _ => Self::Other,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination: Destination::Other,
    }
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn is_get(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  #[default]
  Basic,
  Cors,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub kind: ResponseKind,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn ok(body: impl Into<Vec<u8>>, content_type: &str) -> Self {
    Self {
      status: 200,
      status_text: "OK".to_string(),
      kind: ResponseKind::Basic,
      headers: vec![("Content-Type".to_string(), content_type.to_string())],
      body: body.into(),
    }
  }

  /// Synthesized when neither the network nor the offline document is available.
  pub fn service_unavailable() -> Self {
    Self {
      status: 503,
      status_text: "Service Unavailable".to_string(),
      kind: ResponseKind::Basic,
      headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
      body: b"Offline - please check your connection".to_vec(),
    }
  }

  /// Worth storing in the runtime cache.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind != ResponseKind::Error
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
