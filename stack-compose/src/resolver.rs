use log::{debug, info};
use std::{
    collections::BTreeSet as Set,
    fs, io,
    path::{Path, PathBuf},
    thread,
};

use crate::{
    config::Config,
    error::ResolveError,
    hasher::hash_context,
    models::{BuildPlan, ContentHash, DockerfileSource, ImageTag, ServiceName, ServiceSpec},
    reference::{is_valid_path_component, is_valid_tag},
    templates::{Runtime, Templates},
};

const DOCKERFILE: &str = "Dockerfile";

/// Runtimes in detection order, used when a service has no Dockerfile.
const RUNTIMES: [Runtime; 2] = [Runtime::Node, Runtime::Rust];

type VersionReader = fn(&ServiceSpec, &Path) -> Result<Option<String>, ResolveError>;

/// Files that may declare a version, and how to read it. A service with
/// several of these must agree on one version.
const VERSION_SOURCES: [(&str, VersionReader); 1] = [("package.json", package_json_version)];

/// A version and the file that declared it, if any.
#[derive(Debug)]
struct Version {
    value: String,
    file: Option<PathBuf>,
}

/// The outcome for one service directory.
#[derive(Debug)]
pub struct Resolution {
    pub service: ServiceName,
    pub outcome: Result<BuildPlan, ResolveError>,
}

pub struct Resolver {
    registry_host: String,
    org: String,
    default_version: String,
    templates: Templates,
}

/// Immediate subdirectories of `root`, sorted by name. Hidden directories
/// and plain files are skipped.
pub fn discover(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');

        if path.is_dir() && !hidden {
            dirs.push(path);
        }
    }

    dirs.sort();
    info!("discovered {} services in {:?}", dirs.len(), root);

    Ok(dirs)
}

fn service_name(source_path: &Path) -> ServiceName {
    let name = source_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_path.display().to_string());
    ServiceName(name)
}

impl ServiceSpec {
    pub fn read(source_path: &Path) -> Result<ServiceSpec, ResolveError> {
        let name = service_name(source_path);
        let io_error = |source| ResolveError::Io {
            service: name.clone(),
            source,
        };

        let mut build_files = Set::new();
        for entry in fs::read_dir(source_path).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            if entry.path().is_file() {
                build_files.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }

        Ok(ServiceSpec {
            name,
            source_path: source_path.to_path_buf(),
            build_files,
        })
    }
}

fn package_json_version(
    spec: &ServiceSpec,
    path: &Path,
) -> Result<Option<String>, ResolveError> {
    let invalid = |message: String| ResolveError::InvalidManifest {
        service: spec.name.clone(),
        file: path.to_path_buf(),
        message,
    };

    let contents = fs::read(path).map_err(|err| invalid(err.to_string()))?;
    let manifest: serde_json::Value =
        serde_json::from_slice(&contents).map_err(|err| invalid(err.to_string()))?;

    match manifest.get("version") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(version)) => Ok(Some(version.clone())),
        Some(other) => Err(invalid(format!("version is not a string: {}", other))),
    }
}

impl Resolver {
    pub fn new(config: &Config, templates: Templates) -> Resolver {
        Resolver {
            registry_host: config.registry_host.clone(),
            org: config.org.clone(),
            default_version: config.default_version.clone(),
            templates,
        }
    }

    pub fn from_config(config: &Config) -> io::Result<Resolver> {
        let templates = Templates::load(config.template_dir.as_deref())?;
        Ok(Resolver::new(config, templates))
    }

    /// Decides how to build the service in `source_path` and what to call
    /// the image. Reads the directory, writes nothing.
    pub fn resolve(&self, source_path: &Path) -> Result<BuildPlan, ResolveError> {
        let spec = ServiceSpec::read(source_path)?;
        self.resolve_spec(&spec)
    }

    pub fn resolve_spec(&self, spec: &ServiceSpec) -> Result<BuildPlan, ResolveError> {
        let dockerfile = self.dockerfile(spec)?;
        debug!("{}: building with {}", spec.name, dockerfile);

        let version = self.version(spec)?;
        self.check_reference(spec, &version)?;

        let content_hash = hash_context(&spec.source_path).map_err(|source| ResolveError::Io {
            service: spec.name.clone(),
            source,
        })?;

        let image_tag = ImageTag(format!(
            "{}/{}/{}:{}-{}",
            self.registry_host,
            self.org,
            spec.name,
            version.value,
            content_hash.short()
        ));
        info!("{}: resolved {}", spec.name, image_tag);

        Ok(BuildPlan {
            service: spec.name.clone(),
            context: spec.source_path.clone(),
            dockerfile,
            version: version.value,
            content_hash,
            image_tag,
        })
    }

    /// Resolves every directory on its own thread. One result per
    /// directory, in input order; a failure never stops the others.
    pub fn resolve_all(&self, dirs: &[PathBuf]) -> Vec<Resolution> {
        thread::scope(|scope| {
            let handles = dirs
                .iter()
                .map(|dir| scope.spawn(move || self.resolve(dir)))
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .zip(dirs)
                .map(|(handle, dir)| Resolution {
                    service: service_name(dir),
                    outcome: handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
                })
                .collect()
        })
    }

    fn dockerfile(&self, spec: &ServiceSpec) -> Result<DockerfileSource, ResolveError> {
        if spec.has_file(DOCKERFILE) {
            return Ok(DockerfileSource::Context {
                path: spec.source_path.join(DOCKERFILE),
            });
        }

        RUNTIMES
            .iter()
            .find(|runtime| spec.has_file(runtime.marker_file()))
            .map(|&runtime| DockerfileSource::Template {
                runtime,
                contents: self.templates.get(runtime).into(),
            })
            .ok_or_else(|| ResolveError::UnresolvedBuildRecipe(spec.name.clone()))
    }

    /// The repository path and the tag must be accepted by the registry
    /// before anything is hashed or built.
    fn check_reference(
        &self,
        spec: &ServiceSpec,
        version: &Version,
    ) -> Result<(), ResolveError> {
        let invalid = |message: String| ResolveError::InvalidImageReference {
            service: spec.name.clone(),
            message,
        };

        let path = self.org.split('/').chain(std::iter::once(spec.name.0.as_str()));
        for component in path {
            if !is_valid_path_component(component) {
                return Err(invalid(format!(
                    "{:?} is not a valid repository name component \
                     (lowercase letters, digits and single separators only)",
                    component
                )));
            }
        }

        // Leave room for `-<hash>`.
        let tag = format!("{}-{}", version.value, "0".repeat(ContentHash::SHORT_LEN));
        if is_valid_tag(&tag) {
            return Ok(());
        }

        let message = format!("version {:?} is not a valid image tag", version.value);
        match &version.file {
            Some(file) => Err(ResolveError::InvalidManifest {
                service: spec.name.clone(),
                file: file.clone(),
                message,
            }),
            None => Err(invalid(format!("default {}", message))),
        }
    }

    fn version(&self, spec: &ServiceSpec) -> Result<Version, ResolveError> {
        let mut versions = Vec::new();

        for (file, reader) in VERSION_SOURCES.iter() {
            if !spec.has_file(file) {
                continue;
            }
            if let Some(version) = reader(spec, &spec.source_path.join(file))? {
                versions.push((file.to_string(), version));
            }
        }

        let distinct = versions.iter().map(|(_, v)| v).collect::<Set<_>>().len();
        match distinct {
            0 => Ok(Version {
                value: self.default_version.clone(),
                file: None,
            }),
            1 => {
                let (file, value) = versions.swap_remove(0);
                Ok(Version {
                    value,
                    file: Some(spec.source_path.join(file)),
                })
            }
            _ => Err(ResolveError::AmbiguousVersion {
                service: spec.name.clone(),
                versions,
            }),
        }
    }
}
