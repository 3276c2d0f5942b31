// HTTP Callback Notifier (JSON POST)

use async_trait::async_trait;
use kiln_core::port::{CallbackNotifier, CallbackPayload, DeliveryError};
use std::time::Duration;

pub struct HttpCallbackNotifier {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpCallbackNotifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl CallbackNotifier for HttpCallbackNotifier {
    async fn notify(&self, target: &str, payload: &CallbackPayload) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(target)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Rejected(status.as_u16()))
        }
    }
}
