use anyhow::{anyhow, Result};
use log::{debug, info};
use number_prefix::NumberPrefix;
use std::{
    fs::{self, File, OpenOptions},
    path::PathBuf,
    process::{Command, Stdio},
};
use tar::{Builder as TarBuilder, Header};
use tempfile::TempDir;

use crate::{
    error::PublishError,
    hasher::{context_entries, EntryKind},
    models::{BuildPlan, DockerfileSource, ImageTag},
    services::ImagePublisher,
};

/// Publishes through the `docker` command line tool.
pub struct DockerPublisher {
    program: String,
}

impl DockerPublisher {
    pub fn new() -> DockerPublisher {
        DockerPublisher::with_program("docker")
    }

    pub fn with_program<P: Into<String>>(program: P) -> DockerPublisher {
        DockerPublisher {
            program: program.into(),
        }
    }

    fn run(&self, command: &mut Command) -> Result<(), String> {
        debug!("running {:?}", command);
        let output = command
            .output()
            .map_err(|err| format!("could not run {}: {}", self.program, err))?;

        if output.status.success() {
            debug!("{}", String::from_utf8_lossy(&output.stdout));
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

/// Tars up the build context, with the same entries the content hash
/// covers and links stored as links, plus the fallback Dockerfile when the plan
/// uses one. The archive lives as long as the returned directory.
pub fn archive_context(plan: &BuildPlan) -> Result<(TempDir, PathBuf)> {
    let temp_dir = TempDir::new()?;
    let archive_path = temp_dir.path().join("context.tar");
    let archive = {
        let mut options = OpenOptions::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.write(true).create(true).open(&archive_path)?
    };

    let mut tar = TarBuilder::new(archive);
    tar.follow_symlinks(false);
    let mut context_size = 0;

    for entry in context_entries(&plan.context)? {
        tar.append_path_with_name(&entry.path, &entry.relative)?;
        if entry.kind == EntryKind::File {
            context_size += fs::metadata(&entry.path)?.len();
        }
    }

    if let DockerfileSource::Template { contents, .. } = &plan.dockerfile {
        let mut header = Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append_data(
            &mut header,
            DockerfileSource::TEMPLATE_FILE_NAME,
            contents.as_bytes(),
        )?;
        context_size += contents.len() as u64;
    }

    tar.finish()?;

    match NumberPrefix::binary(context_size as f32) {
        NumberPrefix::Standalone(bytes) => {
            info!("{}: archived build context ({} bytes)", plan.service, bytes)
        }
        NumberPrefix::Prefixed(prefix, n) => {
            info!("{}: archived build context ({:.1} {}B)", plan.service, n, prefix)
        }
    };

    Ok((temp_dir, archive_path))
}

impl ImagePublisher for DockerPublisher {
    fn image_exists(&mut self, tag: &ImageTag) -> Result<bool> {
        let status = Command::new(&self.program)
            .args(&["image", "inspect", &tag.0])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|err| anyhow!("could not run {}: {}", self.program, err))?;

        Ok(status.success())
    }

    fn publish(&mut self, plan: &BuildPlan) -> Result<(), PublishError> {
        let failure = |message: String| PublishError {
            service: plan.service.clone(),
            tag: plan.image_tag.clone(),
            message,
        };

        let (temp_dir, archive_path) =
            archive_context(plan).map_err(|err| failure(err.to_string()))?;
        let context = File::open(&archive_path).map_err(|err| failure(err.to_string()))?;

        let mut build = Command::new(&self.program);
        build.arg("build").arg("-t").arg(&plan.image_tag.0);
        if let Some(dockerfile) = plan.dockerfile.dockerfile_flag() {
            build.arg("-f").arg(dockerfile);
        }
        build.arg("-").stdin(context);

        info!("{}: building {}", plan.service, plan.image_tag);
        self.run(&mut build).map_err(failure)?;

        temp_dir.close().map_err(|err| failure(err.to_string()))?;

        info!("{}: pushing {}", plan.service, plan.image_tag);
        self.run(Command::new(&self.program).arg("push").arg(&plan.image_tag.0))
            .map_err(failure)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{ContentHash, ServiceName},
        templates::Runtime,
    };
    use std::io::Read;
    use tar::{Archive, EntryType};

    fn entries(archive_path: &std::path::Path) -> Vec<(String, String)> {
        let mut archive = Archive::new(File::open(archive_path).unwrap());
        let mut entries = archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let path = entry.path().unwrap().to_string_lossy().into_owned();
                let mut contents = String::new();
                if entry.header().entry_type().is_file() {
                    entry.read_to_string(&mut contents).unwrap();
                }
                (path, contents)
            })
            .collect::<Vec<_>>();
        entries.sort();
        entries
    }

    fn plan(context: PathBuf, dockerfile: DockerfileSource) -> BuildPlan {
        BuildPlan {
            service: ServiceName("api".into()),
            context,
            dockerfile,
            version: "1.0.0".into(),
            content_hash: ContentHash("abc".into()),
            image_tag: ImageTag("gcr.io/acme/api:1.0.0-abc".into()),
        }
    }

    #[test]
    fn archive_holds_context_and_template() {
        let context = TempDir::new().unwrap();
        fs::write(context.path().join("package.json"), "{}").unwrap();
        fs::create_dir(context.path().join("src")).unwrap();
        fs::write(context.path().join("src/index.js"), "hello").unwrap();

        let plan = plan(
            context.path().to_path_buf(),
            DockerfileSource::Template {
                runtime: Runtime::Node,
                contents: "FROM node\n".into(),
            },
        );
        let (_temp_dir, archive_path) = archive_context(&plan).unwrap();

        let files = entries(&archive_path)
            .into_iter()
            .filter(|(path, _)| !path.trim_end_matches('/').ends_with("src"))
            .collect::<Vec<_>>();
        assert_eq!(
            files,
            vec![
                (".stack-compose.Dockerfile".to_string(), "FROM node\n".to_string()),
                ("package.json".to_string(), "{}".to_string()),
                ("src/index.js".to_string(), "hello".to_string()),
            ]
        );
    }

    #[test]
    fn archive_respects_dockerignore() {
        let context = TempDir::new().unwrap();
        fs::write(context.path().join(".dockerignore"), "secret.txt\n").unwrap();
        fs::write(context.path().join("secret.txt"), "x").unwrap();
        fs::write(context.path().join("Dockerfile"), "FROM scratch\n").unwrap();

        let plan = plan(
            context.path().to_path_buf(),
            DockerfileSource::Context {
                path: context.path().join("Dockerfile"),
            },
        );
        let (_temp_dir, archive_path) = archive_context(&plan).unwrap();

        let names = entries(&archive_path)
            .into_iter()
            .map(|(path, _)| path)
            .collect::<Vec<_>>();
        assert_eq!(names, vec![".dockerignore", "Dockerfile"]);
    }

    #[test]
    fn archive_keeps_nested_paths_and_an_ignored_dockerfile() {
        let context = TempDir::new().unwrap();
        fs::write(context.path().join(".dockerignore"), "notes.txt\nDockerfile\n").unwrap();
        fs::write(context.path().join("notes.txt"), "x").unwrap();
        fs::create_dir(context.path().join("src")).unwrap();
        fs::write(context.path().join("src/notes.txt"), "y").unwrap();
        fs::write(context.path().join("Dockerfile"), "FROM scratch\n").unwrap();

        let plan = plan(
            context.path().to_path_buf(),
            DockerfileSource::Context {
                path: context.path().join("Dockerfile"),
            },
        );
        let (_temp_dir, archive_path) = archive_context(&plan).unwrap();

        let files = entries(&archive_path)
            .into_iter()
            .filter(|(path, _)| !path.trim_end_matches('/').ends_with("src"))
            .collect::<Vec<_>>();
        assert_eq!(
            files,
            vec![
                (".dockerignore".to_string(), "notes.txt\nDockerfile\n".to_string()),
                ("Dockerfile".to_string(), "FROM scratch\n".to_string()),
                ("src/notes.txt".to_string(), "y".to_string()),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn archive_stores_links_as_links() {
        use std::os::unix::fs::symlink;

        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("shared.conf"), "SECRET").unwrap();
        let context = TempDir::new().unwrap();
        fs::write(context.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        symlink(outside.path().join("shared.conf"), context.path().join("app.conf")).unwrap();

        let plan = plan(
            context.path().to_path_buf(),
            DockerfileSource::Context {
                path: context.path().join("Dockerfile"),
            },
        );
        let (_temp_dir, archive_path) = archive_context(&plan).unwrap();

        let mut archive = Archive::new(File::open(&archive_path).unwrap());
        let link = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap())
            .find(|entry| entry.path().unwrap() == std::path::Path::new("app.conf"))
            .map(|entry| {
                (
                    entry.header().entry_type(),
                    entry.link_name().unwrap().map(|name| name.into_owned()),
                )
            })
            .unwrap();

        assert_eq!(link.0, EntryType::Symlink);
        assert_eq!(link.1, Some(outside.path().join("shared.conf")));
    }

    #[test]
    fn missing_tool_is_a_publish_error() {
        let context = TempDir::new().unwrap();
        fs::write(context.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let plan = plan(
            context.path().to_path_buf(),
            DockerfileSource::Context {
                path: context.path().join("Dockerfile"),
            },
        );

        let mut publisher = DockerPublisher::with_program("stack-compose-no-such-docker");
        let err = publisher.publish(&plan).unwrap_err();
        assert_eq!(err.service.0, "api");
        assert!(err.message.contains("stack-compose-no-such-docker"));
        assert!(publisher.image_exists(&plan.image_tag).is_err());
    }
}
