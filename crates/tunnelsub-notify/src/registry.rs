//! Node registry webhook
//!
//! The registry either learns the subscription URL (when the launcher has a
//! public URL of its own) or the individual node links.

use serde::Serialize;
use tracing::info;

use crate::{post_json, NotifyError};

/// What gets registered after a publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Subscription URL, `<app_url>/<subscription path>`
    Subscription(String),
    /// Individual node links
    Nodes(Vec<String>),
}

impl Registration {
    /// Subscription URL when `app_url` is set, node list otherwise
    pub fn plan(app_url: Option<&str>, subscription_path: &str, nodes: Vec<String>) -> Self {
        match app_url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(app_url) => Registration::Subscription(format!(
                "{}/{}",
                app_url.trim_end_matches('/'),
                subscription_path.trim_start_matches('/')
            )),
            None => Registration::Nodes(nodes),
        }
    }
}

#[derive(Debug, Serialize)]
struct SubscriptionBody<'a> {
    subscription: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct NodesBody<'a> {
    nodes: &'a [String],
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    pub async fn register(&self, registration: &Registration) -> Result<(), NotifyError> {
        match registration {
            Registration::Subscription(url) => {
                let endpoint = self.endpoint("add-subscriptions");
                let body = SubscriptionBody {
                    subscription: [url.as_str()],
                };
                post_json(&self.client, &endpoint, &body).await?;
                info!("Subscription {} registered", url);
            }
            Registration::Nodes(nodes) => {
                let endpoint = self.endpoint("add-nodes");
                if nodes.is_empty() {
                    return Err(NotifyError::Empty(endpoint));
                }
                post_json(&self.client, &endpoint, &NodesBody { nodes }).await?;
                info!("{} nodes registered", nodes.len());
            }
        }
        Ok(())
    }

    /// Deregister nodes published by a previous run
    pub async fn delete_nodes(&self, nodes: &[String]) -> Result<(), NotifyError> {
        let endpoint = self.endpoint("delete-nodes");
        if nodes.is_empty() {
            return Err(NotifyError::Empty(endpoint));
        }
        post_json(&self.client, &endpoint, &NodesBody { nodes }).await?;
        info!("{} stale nodes deregistered", nodes.len());
        Ok(())
    }
}
