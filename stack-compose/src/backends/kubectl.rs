use log::{debug, info};
use std::{
    io::Write,
    path::PathBuf,
    process::{Command, Stdio},
};

use crate::{error::ApplyError, models::DeploymentDescriptor, services::ManifestApplier};

/// Applies manifests with `kubectl apply`, using the kubeconfig written by
/// cluster provisioning.
pub struct KubectlApplier {
    program: String,
    kubeconfig: PathBuf,
}

impl KubectlApplier {
    pub fn new<P: Into<PathBuf>>(kubeconfig: P) -> KubectlApplier {
        KubectlApplier {
            program: "kubectl".into(),
            kubeconfig: kubeconfig.into(),
        }
    }

    #[cfg(test)]
    pub fn with_program<S: Into<String>>(mut self, program: S) -> KubectlApplier {
        self.program = program.into();
        self
    }
}

impl ManifestApplier for KubectlApplier {
    fn apply(
        &mut self,
        namespace: &str,
        descriptors: &[DeploymentDescriptor],
        manifests: &str,
    ) -> Result<(), ApplyError> {
        let failure = |message: String| ApplyError {
            namespace: namespace.into(),
            services: descriptors
                .iter()
                .map(|d| (d.service_name.clone(), d.image_reference.clone()))
                .collect(),
            message,
        };

        let mut child = Command::new(&self.program)
            .arg("apply")
            .arg("--kubeconfig")
            .arg(&self.kubeconfig)
            .arg("-f")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| failure(format!("could not run {}: {}", self.program, err)))?;

        info!("applying manifests to namespace {}", namespace);
        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| failure("stdin of kubectl is not available".into()))?;
            stdin
                .write_all(manifests.as_bytes())
                .map_err(|err| failure(err.to_string()))?;
        }
        drop(child.stdin.take());

        let output = child
            .wait_with_output()
            .map_err(|err| failure(err.to_string()))?;

        if output.status.success() {
            debug!("{}", String::from_utf8_lossy(&output.stdout));
            Ok(())
        } else {
            Err(failure(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}
