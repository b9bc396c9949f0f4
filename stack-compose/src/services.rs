use anyhow::Result;

use crate::{
    error::{ApplyError, PublishError},
    models::{BuildPlan, DeploymentDescriptor, ImageTag},
};

/// Builds an image from a plan and pushes it to the registry.
pub trait ImagePublisher {
    fn image_exists(&mut self, tag: &ImageTag) -> Result<bool>;

    fn publish(&mut self, plan: &BuildPlan) -> Result<(), PublishError>;
}

/// Hands rendered manifests to the cluster.
pub trait ManifestApplier {
    fn apply(
        &mut self,
        namespace: &str,
        descriptors: &[DeploymentDescriptor],
        manifests: &str,
    ) -> Result<(), ApplyError>;
}
