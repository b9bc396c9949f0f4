use std::{io, path::PathBuf};
use thiserror::Error;

use crate::models::{ImageTag, ServiceName};

/// Why a single service could not be turned into a build plan.
///
/// These never cross service boundaries: a batch keeps one of these per
/// failed service and carries on with the rest.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no Dockerfile, package.json or Cargo.toml found in {0}")]
    UnresolvedBuildRecipe(ServiceName),

    #[error("conflicting versions declared for {service}: {versions:?}")]
    AmbiguousVersion {
        service: ServiceName,
        versions: Vec<(String, String)>,
    },

    #[error("could not read {file:?} in {service}: {message}")]
    InvalidManifest {
        service: ServiceName,
        file: PathBuf,
        message: String,
    },

    #[error("{service} does not make a valid image reference: {message}")]
    InvalidImageReference {
        service: ServiceName,
        message: String,
    },

    #[error("could not read build context of {service}: {source}")]
    Io {
        service: ServiceName,
        #[source]
        source: io::Error,
    },
}

/// The build/push tool reported a failure. The message is the tool's own
/// output, untouched.
#[derive(Debug, Error)]
#[error("failed to publish {tag} for {service}: {message}")]
pub struct PublishError {
    pub service: ServiceName,
    pub tag: ImageTag,
    pub message: String,
}

/// Applying a batch failed. Lists every service and tag the batch carried.
#[derive(Debug, Error)]
#[error(
    "failed to apply manifests to namespace {namespace} ({}): {message}",
    service_list(.services)
)]
pub struct ApplyError {
    pub namespace: String,
    pub services: Vec<(ServiceName, ImageTag)>,
    pub message: String,
}

fn service_list(services: &[(ServiceName, ImageTag)]) -> String {
    services
        .iter()
        .map(|(service, tag)| format!("{} {}", service, tag))
        .collect::<Vec<_>>()
        .join(", ")
}
