use serde::Serialize;
use std::{
    collections::{BTreeMap as Map, BTreeSet as Set},
    fmt,
    path::PathBuf,
};

use crate::templates::Runtime;

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ServiceName(pub String);

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Hash, PartialOrd, Ord, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ImageTag(pub String);

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex encoded blake3 digest of a whole build context.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub const SHORT_LEN: usize = 12;

    /// The prefix of the digest that goes into image tags.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(Self::SHORT_LEN);
        &self.0[..end]
    }
}

/// One directory under the services root.
#[derive(Clone, Debug)]
pub struct ServiceSpec {
    pub name: ServiceName,
    pub source_path: PathBuf,
    /// File names found at the top level of `source_path`.
    pub build_files: Set<String>,
}

impl ServiceSpec {
    pub fn has_file(&self, name: &str) -> bool {
        self.build_files.contains(name)
    }
}

/// Where the Dockerfile for a build comes from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DockerfileSource {
    /// The service ships its own `Dockerfile` in the build context.
    Context { path: PathBuf },
    /// A fallback template picked from the detected runtime.
    Template {
        runtime: Runtime,
        #[serde(skip_serializing)]
        contents: String,
    },
}

impl DockerfileSource {
    /// Name the template is stored under inside the archived build context.
    pub const TEMPLATE_FILE_NAME: &'static str = ".stack-compose.Dockerfile";

    /// The `-f` argument the build tool needs, if any. A service's own
    /// Dockerfile sits where the build tool looks by default.
    pub fn dockerfile_flag(&self) -> Option<&'static str> {
        match self {
            DockerfileSource::Context { .. } => None,
            DockerfileSource::Template { .. } => Some(Self::TEMPLATE_FILE_NAME),
        }
    }
}

impl fmt::Display for DockerfileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DockerfileSource::Context { .. } => f.write_str("Dockerfile"),
            DockerfileSource::Template { runtime, .. } => {
                write!(f, "{} (built-in)", runtime.template_file_name())
            }
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct BuildPlan {
    pub service: ServiceName,
    pub context: PathBuf,
    pub dockerfile: DockerfileSource,
    pub version: String,
    pub content_hash: ContentHash,
    pub image_tag: ImageTag,
}

/// Something that has to exist before a deployment can be created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Dependency {
    Namespace(String),
    ImagePush(ImageTag),
}

#[derive(Clone, Debug, Serialize)]
pub struct DeploymentDescriptor {
    pub service_name: ServiceName,
    pub image_reference: ImageTag,
    pub labels: Map<String, String>,
    pub depends_on: Vec<Dependency>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BuildPolicy {
    Always,
    IfMissing,
}
