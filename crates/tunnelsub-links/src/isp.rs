//! Network label lookup
//!
//! The label ends up in every link remark. It is cosmetic, so callers go
//! through [`resolve_label`], which never fails.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use tunnelsub_proto::PLACEHOLDER_ISP_LABEL;

/// Public metadata endpoint describing the caller's network
pub const CLOUDFLARE_META_URL: &str = "https://speed.cloudflare.com/meta";

const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum IspLookupError {
    #[error("Metadata request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Metadata response is missing field: {0}")]
    MissingField(&'static str),
}

/// Source of the short network label used in link remarks
#[async_trait]
pub trait IspLookup: Send + Sync {
    async fn lookup(&self) -> Result<String, IspLookupError>;
}

/// Minimal schema of the metadata response
#[derive(Debug, Deserialize)]
struct MetaResponse {
    country: Option<String>,
    #[serde(rename = "asOrganization")]
    as_organization: Option<String>,
}

/// Looks the label up from the Cloudflare metadata endpoint
#[derive(Debug, Clone)]
pub struct CloudflareMeta {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl CloudflareMeta {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_url(client, CLOUDFLARE_META_URL)
    }

    pub fn with_url(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl IspLookup for CloudflareMeta {
    async fn lookup(&self) -> Result<String, IspLookupError> {
        let meta: MetaResponse = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let country = meta
            .country
            .filter(|c| !c.trim().is_empty())
            .ok_or(IspLookupError::MissingField("country"))?;
        let organization = meta
            .as_organization
            .filter(|o| !o.trim().is_empty())
            .ok_or(IspLookupError::MissingField("asOrganization"))?;

        Ok(format_label(&country, &organization))
    }
}

/// Fixed label, for deployments that configure one explicitly
#[derive(Debug, Clone)]
pub struct StaticIsp {
    label: String,
}

impl StaticIsp {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

#[async_trait]
impl IspLookup for StaticIsp {
    async fn lookup(&self) -> Result<String, IspLookupError> {
        Ok(self.label.clone())
    }
}

/// `<country>-<organization>` with spaces replaced by underscores
pub fn format_label(country: &str, organization: &str) -> String {
    format!("{}-{}", country.trim(), organization.trim()).replace(' ', "_")
}

/// Look the label up, falling back to the placeholder on any failure
pub async fn resolve_label(lookup: &dyn IspLookup) -> String {
    match lookup.lookup().await {
        Ok(label) if !label.trim().is_empty() => {
            debug!("Network label: {}", label);
            label
        }
        Ok(_) => {
            warn!(
                "Network label lookup returned nothing, using '{}'",
                PLACEHOLDER_ISP_LABEL
            );
            PLACEHOLDER_ISP_LABEL.to_string()
        }
        Err(e) => {
            warn!(
                "Network label lookup failed: {}. Using '{}'",
                e, PLACEHOLDER_ISP_LABEL
            );
            PLACEHOLDER_ISP_LABEL.to_string()
        }
    }
}
