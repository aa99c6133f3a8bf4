//! Authenticated, retrying access to the GitHub REST API.
//!
//! Feature code (repository discovery, secret distribution, collaborator
//! management) obtains an [`ApiClient`] and never resolves tokens or retries
//! on its own.
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), classpilot_core::ClasspilotError> {
//! use classpilot_core::{ApiClient, Paths, Settings, TokenManager};
//!
//! let paths = Paths::user()?;
//! let settings = Settings::load(&paths)?;
//! let manager = TokenManager::from_settings(&settings, &paths)?;
//! let client = ApiClient::connect(&manager, &settings).await?;
//!
//! let repo: serde_json::Value = client.get_json("repos/octo-org/assignment-template").await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::classify::{ApiError, ErrorKind};
use crate::error::ClasspilotError;
use crate::model::{Credential, RateLimit};
use crate::retry::RetryPolicy;
use crate::settings::Settings;
use crate::store::Secret;
use crate::token_manager::TokenManager;
use crate::verify::{CLIENT_USER_AGENT, GITHUB_ACCEPT, GITHUB_API_VERSION, endpoint};

/// The account behind the token, from `GET /user`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub login: String,
    pub id: u64,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Secret,
    retry: RetryPolicy,
}

impl ApiClient {
    /// Resolve the token through `manager` and build a client from `settings`.
    ///
    /// Fails with [`TokenError::Missing`](crate::TokenError::Missing) when no
    /// backend holds a token.
    pub async fn connect(manager: &TokenManager, settings: &Settings) -> Result<Self, ClasspilotError> {
        let credential = manager.require_token().await?;
        tracing::debug!(
            token = %credential.masked(),
            source = %credential.storage_type,
            "creating GitHub API client"
        );
        Ok(Self::new(
            &credential,
            settings.api_base_url.clone(),
            settings.retry.clone(),
            settings.request_timeout(),
        )?)
    }

    pub fn new(
        credential: &Credential,
        base_url: Url,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            token: credential.token.clone(),
            retry,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run an arbitrary operation under this client's retry policy.
    ///
    /// The operation must be safe to repeat.
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<ApiError>,
    {
        self.retry.with_retry(operation).await
    }

    /// Issue one request. Non-2xx responses become classified errors.
    pub async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ApiError> {
        let url = endpoint(&self.base_url, path)?;
        let mut request = self
            .http
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token.expose()))
            .header(ACCEPT, GITHUB_ACCEPT)
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .header(USER_AGENT, CLIENT_USER_AGENT);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        if let Some(rl) = RateLimit::from_headers(response.headers()) {
            rl.trace();
        }

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(ApiError::from_response(response).await)
        }
    }

    /// Issue a request with retries.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response, ApiError> {
        tracing::debug!(%method, path, "GitHub API request");
        self.run(|| self.send_once(method.clone(), path, body.as_ref()))
            .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        decode(self.send(Method::GET, path, None).await?).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        decode(self.send(Method::POST, path, Some(encode(body)?)).await?).await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        decode(self.send(Method::PUT, path, Some(encode(body)?)).await?).await
    }

    /// PUT whose response body is ignored (201/204 endpoints such as
    /// repository secrets and collaborator invitations).
    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        self.send(Method::PUT, path, Some(encode(body)?)).await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(Method::DELETE, path, None).await?;
        Ok(())
    }

    /// The account the token belongs to.
    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.get_json("user").await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token)
            .field("retry", &self.retry)
            .finish()
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(body)
        .map_err(|e| ApiError::new(ErrorKind::Unknown, format!("failed to encode request body: {}", e)))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    response.json::<T>().await.map_err(|e| {
        let mut err = ApiError::new(
            ErrorKind::Unknown,
            format!("failed to decode response body: {}", e),
        );
        err.status = Some(status.as_u16());
        err
    })
}
