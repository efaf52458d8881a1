//! HTTP plumbing shared by both protocol flavors.

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use parley_llm::error_parsing::error_from_response;
use parley_llm::{ProviderError, ProviderResult};

use crate::types::OpenAiConfig;

/// Authenticated client bound to one API root.
#[derive(Clone, Debug)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    /// Build the underlying connection pool.
    pub fn new(config: OpenAiConfig) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// Configuration in use.
    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path.trim_start_matches('/'))
    }

    fn headers(key: Option<&SecretString>, accept: &'static str) -> ProviderResult<HeaderMap> {
        let key = key.ok_or_else(|| ProviderError::Auth {
            message: "OpenAI API key is not set".into(),
        })?;
        let mut headers = HeaderMap::new();
        let _ = headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", key.expose_secret())).map_err(|e| {
                ProviderError::Auth {
                    message: format!("Invalid authorization header: {e}"),
                }
            })?,
        );
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let _ = headers.insert(ACCEPT, HeaderValue::from_static(accept));
        Ok(headers)
    }

    async fn check(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// POST a JSON body and return the raw SSE response.
    pub async fn post_stream<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ProviderResult<reqwest::Response> {
        let url = self.url(path);
        debug!(url = %url, "opening stream");
        let response = self
            .http
            .post(&url)
            .headers(Self::headers(self.config.api_key.as_ref(), "text/event-stream")?)
            .json(body)
            .send()
            .await?;
        Self::check(response).await
    }

    /// POST a JSON body and decode the JSON reply.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> ProviderResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.url(path))
            .headers(Self::headers(self.config.api_key.as_ref(), "application/json")?)
            .json(body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// GET a JSON resource with the inference key.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ProviderResult<T> {
        self.get_json_with(path, &[], self.config.api_key.as_ref()).await
    }

    /// GET a JSON resource with explicit query and key.
    pub async fn get_json_with<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        key: Option<&SecretString>,
    ) -> ProviderResult<T> {
        let response = self
            .http
            .get(self.url(path))
            .headers(Self::headers(key, "application/json")?)
            .query(query)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn url_joins_without_double_slash() {
        let client = OpenAiClient::new(OpenAiConfig::new("http://h/v1/", SecretString::from("k"))).unwrap();
        assert_eq!(client.url("/chat/completions"), "http://h/v1/chat/completions");
        assert_eq!(client.url("models"), "http://h/v1/models");
    }

    #[tokio::test]
    async fn missing_key_is_an_auth_error() {
        let client = OpenAiClient::new(OpenAiConfig::default()).unwrap();
        let result: ProviderResult<serde_json::Value> = client.get_json("models").await;
        assert_matches!(result, Err(ProviderError::Auth { .. }));
    }

    #[tokio::test]
    async fn error_status_is_parsed() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/models"))
            .respond_with(wiremock::ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {"message": "not here", "type": "invalid_request_error"}
            })))
            .mount(&server)
            .await;
        let client = OpenAiClient::new(OpenAiConfig::new(server.uri(), SecretString::from("k"))).unwrap();
        let result: ProviderResult<serde_json::Value> = client.get_json("models").await;
        assert_matches!(result, Err(ProviderError::Api { status: 404, .. }));
    }
}
