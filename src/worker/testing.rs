//! Scripted network for tests.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::http::{Fetch, Request, Response};

#[derive(Default)]
struct Script {
  routes: HashMap<String, Response>,
  offline: bool,
  delay: Option<Duration>,
  calls: Vec<String>,
}

/// Answers from a URL table; unknown URLs get a 404.
#[derive(Clone, Default)]
pub struct FakeNetwork {
  script: Arc<Mutex<Script>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self.script.lock().unwrap().routes.insert(url.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.script.lock().unwrap().offline = offline;
  }

  pub fn set_delay(&self, delay: Duration) {
    self.script.lock().unwrap().delay = Some(delay);
  }

  pub fn calls(&self) -> usize {
    self.script.lock().unwrap().calls.len()
  }
}

impl Fetch for FakeNetwork {
  fn fetch(&self, request: Request) -> BoxFuture<'static, Result<Response>> {
    let script = self.script.clone();
    Box::pin(async move {
      let url = request.url.to_string();
      let delay = {
        let mut script = script.lock().unwrap();
        script.calls.push(url.clone());
        script.delay
      };
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }

      let script = script.lock().unwrap();
      if script.offline {
        return Err(eyre!("Request to {} failed: network unreachable", url));
      }
      Ok(
        script
          .routes
          .get(&url)
          .cloned()
          .unwrap_or_else(|| Response::new(404, "Not Found")),
      )
    })
  }
}
