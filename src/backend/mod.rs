// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Abstraction around the Profiler control plane.
//!
//! The agent polls the control plane for work and uploads finished
//! profiles back to it. Both calls go through [`ProfilerBackend`] so the
//! loop can be driven against a mock in tests; [`api::ApiClient`] is the
//! HTTP implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod api;

/// Profile kinds the control plane can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProfileType {
    /// CPU-time profile sampled by wall clock.
    Wall,
    /// Sampling allocation profile.
    Heap,
    /// Any kind this agent does not know how to collect.
    #[serde(other)]
    Unspecified,
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProfileType::Wall => "WALL",
            ProfileType::Heap => "HEAP",
            ProfileType::Unspecified => "UNSPECIFIED",
        })
    }
}

/// The control plane's notion of which instance of which service is
/// uploading: project, target service, and descriptive labels (zone,
/// instance, version when known).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Cloud project the deployment belongs to.
    pub project_id: String,
    /// The service being profiled.
    pub target: String,
    /// Descriptive labels attached to the deployment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A profile the control plane asked the agent to collect.
///
/// Immutable after receipt, except for `profile_bytes`, which is filled
/// in between collection and upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    /// Server-assigned resource name; doubles as the upload path.
    pub name: String,
    /// What kind of profile the server wants.
    pub profile_type: ProfileType,
    /// Requested collection window as a protobuf JSON duration string
    /// such as `"10s"`. Only meaningful for WALL profiles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Server-assigned labels, carried through the upload unchanged.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// The collected profile: pprof bytes, gzipped, base64-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_bytes: Option<String>,
}

/// An error talking to the control plane.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BackendError {
    /// The transport failed before a response arrived.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("server returned status {status}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// Backoff the server asked for, when its error body carried a
        /// RetryInfo detail.
        backoff: Option<Duration>,
    },
    /// A success response that did not contain a profile to collect.
    #[error("server returned no profile (status {0})")]
    NoProfile(u16),
}

impl BackendError {
    /// Whether the poll that produced this error may be retried. Client
    /// errors that retrying cannot fix are fatal for the agent.
    pub fn is_retriable(&self) -> bool {
        match self {
            BackendError::Status { status, .. } => !matches!(status, 400 | 401 | 403 | 404),
            BackendError::Transport(_) | BackendError::NoProfile(_) => true,
        }
    }

    /// The backoff the server requested, when the error carried one.
    pub fn server_backoff(&self) -> Option<Duration> {
        match self {
            BackendError::Status { backoff, .. } => *backoff,
            _ => None,
        }
    }
}

/// The control-plane seam the agent loop drives.
#[async_trait]
pub trait ProfilerBackend: Send + Sync + fmt::Debug {
    /// Long-hanging poll: ask for the next profile to collect. Does not
    /// resolve until the server wants one, the transport fails, or the
    /// server rejects the request.
    async fn create_profile(
        &self,
        deployment: &Deployment,
        profile_types: &[ProfileType],
    ) -> Result<ProfileRequest, BackendError>;

    /// Upload a collected profile under its server-assigned name.
    async fn upload_profile(&self, profile: &ProfileRequest) -> Result<(), BackendError>;
}

/// Parse a protobuf JSON duration string: decimal seconds with an `s`
/// suffix, `"10s"` or `"32.5s"`.
pub(crate) fn parse_duration(s: &str) -> Option<Duration> {
    let seconds: f64 = s.strip_suffix('s')?.parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("10s", Some(Duration::from_secs(10)); "whole seconds")]
    #[test_case("32.5s", Some(Duration::from_millis(32_500)); "fractional")]
    #[test_case("0s", Some(Duration::ZERO); "zero")]
    #[test_case("10", None; "missing suffix")]
    #[test_case("-3s", None; "negative")]
    #[test_case("NaNs", None; "not a number")]
    #[test_case("", None; "empty")]
    fn test_parse_duration(input: &str, expected: Option<Duration>) {
        assert_eq!(parse_duration(input), expected);
    }

    #[test]
    fn test_profile_type_wire_names() {
        assert_eq!(serde_json::to_string(&ProfileType::Wall).unwrap(), "\"WALL\"");
        assert_eq!(serde_json::to_string(&ProfileType::Heap).unwrap(), "\"HEAP\"");
        let parsed: ProfileType = serde_json::from_str("\"HEAP\"").unwrap();
        assert_eq!(parsed, ProfileType::Heap);
        // kinds this agent does not understand must not fail to parse
        let parsed: ProfileType = serde_json::from_str("\"CONTENTION\"").unwrap();
        assert_eq!(parsed, ProfileType::Unspecified);
    }

    #[test]
    fn test_profile_request_parses_server_response() {
        let request: ProfileRequest = serde_json::from_str(
            r#"{
                "name": "projects/p/profiles/abc123",
                "profileType": "WALL",
                "duration": "10s",
                "labels": {"instance": "gke-pool-1"}
            }"#,
        )
        .unwrap();
        assert_eq!(request.name, "projects/p/profiles/abc123");
        assert_eq!(request.profile_type, ProfileType::Wall);
        assert_eq!(request.duration.as_deref(), Some("10s"));
        assert_eq!(request.labels["instance"], "gke-pool-1");
        assert_eq!(request.profile_bytes, None);
    }

    #[test]
    fn test_profile_request_upload_body_shape() {
        let request = ProfileRequest {
            name: "projects/p/profiles/abc123".to_owned(),
            profile_type: ProfileType::Heap,
            duration: None,
            labels: BTreeMap::new(),
            profile_bytes: Some("aGVsbG8=".to_owned()),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "name": "projects/p/profiles/abc123",
                "profileType": "HEAP",
                "profileBytes": "aGVsbG8="
            })
        );
    }

    #[test_case(400, false)]
    #[test_case(401, false)]
    #[test_case(403, false)]
    #[test_case(404, false)]
    #[test_case(409, true)]
    #[test_case(429, true)]
    #[test_case(500, true)]
    #[test_case(503, true)]
    fn test_status_retriability(status: u16, retriable: bool) {
        let err = BackendError::Status {
            status,
            backoff: None,
        };
        assert_eq!(err.is_retriable(), retriable);
    }
}
