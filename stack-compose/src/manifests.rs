//! Kubernetes objects for the deploy stage: a Namespace, then one
//! Deployment and one Service per published image.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::BTreeMap as Map;

use crate::{
    labels::SelectorConvention,
    models::{BuildPlan, Dependency, DeploymentDescriptor},
};

pub const CONTAINER_NAME: &str = "application";
pub const HTTP_PORT: u16 = 80;
pub const HEALTH_PATH: &str = "/health";

impl DeploymentDescriptor {
    pub fn from_plan(
        plan: &BuildPlan,
        namespace: &str,
        convention: &SelectorConvention,
    ) -> DeploymentDescriptor {
        DeploymentDescriptor {
            service_name: plan.service.clone(),
            image_reference: plan.image_tag.clone(),
            labels: convention.labels(&plan.service),
            depends_on: vec![
                Dependency::Namespace(namespace.into()),
                Dependency::ImagePush(plan.image_tag.clone()),
            ],
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    labels: Map<String, String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Namespace {
    api_version: &'static str,
    kind: &'static str,
    metadata: ObjectMeta,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Deployment {
    api_version: &'static str,
    kind: &'static str,
    metadata: ObjectMeta,
    spec: DeploymentSpec,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentSpec {
    selector: LabelSelector,
    template: PodTemplate,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LabelSelector {
    match_labels: Map<String, String>,
}

#[derive(Clone, Debug, Serialize)]
struct PodTemplate {
    metadata: PodMeta,
    spec: PodSpec,
}

#[derive(Clone, Debug, Serialize)]
struct PodMeta {
    labels: Map<String, String>,
}

#[derive(Clone, Debug, Serialize)]
struct PodSpec {
    containers: Vec<Container>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Container {
    name: &'static str,
    image: String,
    ports: Vec<ContainerPort>,
    liveness_probe: Probe,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerPort {
    container_port: u16,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Probe {
    http_get: HttpGet,
}

#[derive(Clone, Debug, Serialize)]
struct HttpGet {
    path: &'static str,
    port: u16,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Service {
    api_version: &'static str,
    kind: &'static str,
    metadata: ObjectMeta,
    spec: ServiceSpec,
}

#[derive(Clone, Debug, Serialize)]
struct ServiceSpec {
    selector: Map<String, String>,
    ports: Vec<ServicePort>,
}

#[derive(Clone, Debug, Serialize)]
struct ServicePort {
    port: u16,
}

fn deployment(namespace: &str, descriptor: &DeploymentDescriptor) -> Deployment {
    Deployment {
        api_version: "apps/v1",
        kind: "Deployment",
        metadata: ObjectMeta {
            name: descriptor.service_name.0.clone(),
            namespace: Some(namespace.into()),
            labels: descriptor.labels.clone(),
        },
        spec: DeploymentSpec {
            selector: LabelSelector {
                match_labels: descriptor.labels.clone(),
            },
            template: PodTemplate {
                metadata: PodMeta {
                    labels: descriptor.labels.clone(),
                },
                spec: PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME,
                        image: descriptor.image_reference.0.clone(),
                        ports: vec![ContainerPort {
                            container_port: HTTP_PORT,
                        }],
                        liveness_probe: Probe {
                            http_get: HttpGet {
                                path: HEALTH_PATH,
                                port: HTTP_PORT,
                            },
                        },
                    }],
                },
            },
        },
    }
}

fn service(
    namespace: &str,
    descriptor: &DeploymentDescriptor,
    convention: &SelectorConvention,
) -> Service {
    Service {
        api_version: "v1",
        kind: "Service",
        metadata: ObjectMeta {
            name: descriptor.service_name.0.clone(),
            namespace: Some(namespace.into()),
            labels: Map::new(),
        },
        spec: ServiceSpec {
            selector: convention.selector(&descriptor.service_name),
            ports: vec![ServicePort { port: HTTP_PORT }],
        },
    }
}

/// Renders a multi-document YAML stream, namespace first. Every descriptor
/// must depend on exactly this namespace.
pub fn render(
    namespace: &str,
    descriptors: &[DeploymentDescriptor],
    convention: &SelectorConvention,
) -> Result<String> {
    let mut out = serde_yaml::to_string(&Namespace {
        api_version: "v1",
        kind: "Namespace",
        metadata: ObjectMeta {
            name: namespace.into(),
            namespace: None,
            labels: Map::new(),
        },
    })?;

    for descriptor in descriptors {
        let in_namespace = descriptor
            .depends_on
            .iter()
            .any(|dependency| *dependency == Dependency::Namespace(namespace.into()));
        if !in_namespace {
            return Err(anyhow!(
                "{} does not belong to namespace {}",
                descriptor.service_name,
                namespace
            ));
        }

        push_document(&mut out, &serde_yaml::to_string(&deployment(namespace, descriptor))?);
        push_document(
            &mut out,
            &serde_yaml::to_string(&service(namespace, descriptor, convention))?,
        );
    }

    Ok(out)
}

fn push_document(out: &mut String, document: &str) {
    if !out.ends_with('\n') {
        out.push('\n');
    }
    if !document.starts_with("---") {
        out.push_str("---\n");
    }
    out.push_str(document);
}
