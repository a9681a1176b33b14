// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Discovery of the deployment's identity from the GCE metadata server.
//!
//! When the configuration leaves `project_id`, `zone`, or `instance`
//! unset, the agent asks the metadata server for them. Off GCE the server
//! is unreachable and every lookup quietly comes back empty; only values
//! that are still missing *and* required fail startup, over in the config
//! layer.

use std::time::Duration;

use thiserror::Error;

const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";

/// An error fetching one metadata value.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetadataError {
    /// The metadata server could not be reached.
    #[error("failed to reach the metadata server: {0}")]
    Transport(#[from] reqwest::Error),
    /// The metadata server answered with a non-success status.
    #[error("metadata server returned status {0}")]
    Status(u16),
}

/// Values discovered from the metadata server. Every lookup is best
/// effort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GceMetadata {
    /// The project this instance belongs to.
    pub project_id: Option<String>,
    /// The zone the instance runs in, e.g. `us-central1-a`.
    pub zone: Option<String>,
    /// The instance name.
    pub instance: Option<String>,
}

async fn fetch(client: &reqwest::Client, path: &str) -> Result<String, MetadataError> {
    let response = client
        .get(format!("{METADATA_BASE}{path}"))
        .header("Metadata-Flavor", "Google")
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(MetadataError::Status(response.status().as_u16()));
    }
    Ok(response.text().await?)
}

/// The zone endpoint returns a full resource path such as
/// `projects/123456/zones/us-central1-a`; only the last segment names the
/// zone.
fn zone_from_resource(resource: &str) -> &str {
    resource.rsplit('/').next().unwrap_or(resource)
}

/// Query the metadata server for project id, zone, and instance name.
/// Lookups that fail (off GCE, firewalled, missing entry) come back as
/// `None` with a debug log.
pub async fn load_gce_metadata() -> GceMetadata {
    // the metadata server is link-local; anything slow means we are not on
    // GCE, so keep the whole exchange short
    let client = match reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(1))
        .timeout(Duration::from_secs(3))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            tracing::debug!(?err, "could not build metadata client");
            return GceMetadata::default();
        }
    };

    let mut metadata = GceMetadata::default();
    match fetch(&client, "/project/project-id").await {
        Ok(project_id) => metadata.project_id = Some(project_id.trim().to_owned()),
        Err(err) => tracing::debug!(%err, "project id not available from metadata server"),
    }
    match fetch(&client, "/instance/zone").await {
        Ok(zone) => metadata.zone = Some(zone_from_resource(zone.trim()).to_owned()),
        Err(err) => tracing::debug!(%err, "zone not available from metadata server"),
    }
    match fetch(&client, "/instance/name").await {
        Ok(instance) => metadata.instance = Some(instance.trim().to_owned()),
        Err(err) => tracing::debug!(%err, "instance name not available from metadata server"),
    }
    metadata
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("projects/123456789/zones/us-central1-a", "us-central1-a"; "full resource path")]
    #[test_case("us-central1-a", "us-central1-a"; "bare zone")]
    #[test_case("", ""; "empty")]
    fn test_zone_from_resource(input: &str, expected: &str) {
        assert_eq!(zone_from_resource(input), expected);
    }
}
