// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The HTTP control-plane client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use super::{
    parse_duration, BackendError, Deployment, ProfileRequest, ProfileType, ProfilerBackend,
};

/// The production Cloud Profiler endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://cloudprofiler.googleapis.com/v2";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateProfileBody<'a> {
    deployment: &'a Deployment,
    profile_type: &'a [ProfileType],
}

// The error-body shape that carries a google.rpc.RetryInfo detail. Fields
// other than retryDelay are irrelevant here and left unmodeled.
#[derive(Deserialize)]
struct ErrorBody {
    error: Option<ErrorStatus>,
}

#[derive(Deserialize)]
struct ErrorStatus {
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    retry_delay: Option<String>,
}

/// HTTP client for the Profiler API.
///
/// The `CreateProfile` call is long-hanging: the server holds the request
/// open until it wants a profile from this deployment, which can take
/// many minutes. The client is therefore built without a total request
/// timeout; only connection establishment is bounded.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Build a client against `base_url` (see [`DEFAULT_API_ENDPOINT`]).
    /// When `auth_token` is set it is sent as a bearer token; acquiring
    /// one is the embedder's concern.
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
    ) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(ApiClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            auth_token,
        })
    }

    fn request(&self, method: Method, url: String) -> reqwest::RequestBuilder {
        let mut request = self.http.request(method, url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn status_error(response: reqwest::Response) -> BackendError {
        let status = response.status().as_u16();
        let backoff = match response.text().await {
            Ok(body) => parse_retry_hint(&body),
            Err(_) => None,
        };
        BackendError::Status { status, backoff }
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the auth token must not end up in logs
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Pull the server's backoff request out of an error body, when present.
/// The control plane throttles agents through a RetryInfo detail:
/// `{"error":{"details":[{"retryDelay":"32s",…}]}}`.
fn parse_retry_hint(body: &str) -> Option<Duration> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .error?
        .details
        .into_iter()
        .find_map(|detail| detail.retry_delay)
        .and_then(|delay| parse_duration(&delay))
}

#[async_trait]
impl ProfilerBackend for ApiClient {
    async fn create_profile(
        &self,
        deployment: &Deployment,
        profile_types: &[ProfileType],
    ) -> Result<ProfileRequest, BackendError> {
        let url = format!(
            "{}/projects/{}/profiles",
            self.base_url, deployment.project_id
        );
        tracing::debug!(url = %url, "polling the control plane for a profile");
        let response = self
            .request(Method::POST, url)
            .json(&CreateProfileBody {
                deployment,
                profile_type: profile_types,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(response).await);
        }
        if status == StatusCode::NO_CONTENT {
            return Err(BackendError::NoProfile(status.as_u16()));
        }
        Ok(response.json().await?)
    }

    async fn upload_profile(&self, profile: &ProfileRequest) -> Result<(), BackendError> {
        let url = format!("{}/{}", self.base_url, profile.name);
        tracing::debug!(name = %profile.name, "uploading profile");
        let response = self.request(Method::PATCH, url).json(profile).send().await?;
        if response.status().as_u16() >= 300 {
            return Err(Self::status_error(response).await);
        }
        Ok(())
    }
}
