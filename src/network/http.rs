use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::common::{OutboundMessage, SendError};
use crate::pipeline::MessageBackend;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY: usize = 1024;

/// Sends messages to a remote endpoint as `{"sender": .., "message": ..}`.
pub struct HttpBackend {
    client: Client,
    endpoint: String,
}

impl HttpBackend {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SendError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| SendError::Unreachable(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl MessageBackend for HttpBackend {
    async fn send_message(&self, outbound: &OutboundMessage) -> Result<(), SendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(outbound)
            .send()
            .await
            .map_err(|err| SendError::Unreachable(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        Err(SendError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
