use crate::config::AuthorityConfig;
use crate::domain::mapping::Action;
use crate::domain::ports::AuthorityClient;
use crate::domain::protocol::{AckResponse, RequestEnvelope};
use crate::error::{DispatchError, Result};
use async_trait::async_trait;

/// [`AuthorityClient`] posting JSON envelopes over HTTP with a bounded timeout.
#[derive(Clone)]
pub struct HttpAuthorityClient {
    client: reqwest::Client,
    config: AuthorityConfig,
}

impl HttpAuthorityClient {
    pub fn new(config: AuthorityConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }
}

fn classify(e: reqwest::Error) -> DispatchError {
    // A connect timeout means the request never reached the authority
    if e.is_timeout() && !e.is_connect() {
        DispatchError::ReadTimeout
    } else if let Some(status) = e.status() {
        DispatchError::Status(status.as_u16())
    } else if e.is_decode() {
        DispatchError::Decode(e.to_string())
    } else {
        DispatchError::Transport(e.to_string())
    }
}

#[async_trait]
impl AuthorityClient for HttpAuthorityClient {
    async fn post(
        &self,
        action: Action,
        envelope: &RequestEnvelope,
    ) -> std::result::Result<AckResponse, DispatchError> {
        let url = self.config.url(action);
        if url.is_empty() {
            return Err(DispatchError::NotConfigured(action.into()));
        }

        let response = self
            .client
            .post(url)
            .json(envelope)
            .send()
            .await
            .map_err(classify)?
            .error_for_status()
            .map_err(classify)?;

        response.json::<AckResponse>().await.map_err(classify)
    }
}
