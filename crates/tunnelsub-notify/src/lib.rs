//! Outbound notifications about a freshly published subscription
//!
//! Both channels are best effort. Callers log a [`NotifyError`] and carry on.

pub mod registry;
pub mod telegram;

pub use registry::{Registration, RegistryClient};
pub use telegram::{escape_markdown_v2, TelegramNotifier};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} answered {status}")]
    Rejected {
        endpoint: String,
        status: reqwest::StatusCode,
    },

    #[error("Nothing to send to {0}")]
    Empty(String),
}

/// POST `body` as JSON and require a success status
pub(crate) async fn post_json<T: serde::Serialize + ?Sized>(
    client: &reqwest::Client,
    endpoint: &str,
    body: &T,
) -> Result<(), NotifyError> {
    let response = client
        .post(endpoint)
        .json(body)
        .send()
        .await
        .map_err(|source| NotifyError::Request {
            endpoint: endpoint.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(NotifyError::Rejected {
            endpoint: endpoint.to_string(),
            status,
        });
    }
    Ok(())
}
