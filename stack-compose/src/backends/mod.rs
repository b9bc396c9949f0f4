mod docker;
mod kubectl;

pub use docker::DockerPublisher;
pub use kubectl::KubectlApplier;
