use log::debug;
use serde::Serialize;
use std::{fs, io, path::Path};

const NODE_DOCKERFILE: &str = r#"FROM node:16-alpine
WORKDIR /app
COPY package*.json ./
RUN npm install --production
COPY . .
EXPOSE 80
CMD ["npm", "start"]
"#;

const RUST_DOCKERFILE: &str = r#"FROM rust:1.56 AS build
WORKDIR /src
COPY . .
RUN cargo install --path . --root /app

FROM debian:bullseye-slim
COPY --from=build /app/bin/ /app/bin/
EXPOSE 80
CMD ["sh", "-c", "exec /app/bin/*"]
"#;

/// A runtime recognised from a marker file.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Runtime {
    Node,
    Rust,
}

impl Runtime {
    pub fn marker_file(self) -> &'static str {
        match self {
            Runtime::Node => "package.json",
            Runtime::Rust => "Cargo.toml",
        }
    }

    pub fn template_file_name(self) -> &'static str {
        match self {
            Runtime::Node => "Dockerfile.node",
            Runtime::Rust => "Dockerfile.rust",
        }
    }

    fn builtin_template(self) -> &'static str {
        match self {
            Runtime::Node => NODE_DOCKERFILE,
            Runtime::Rust => RUST_DOCKERFILE,
        }
    }
}

/// Fallback Dockerfiles, one per runtime.
#[derive(Clone, Debug)]
pub struct Templates {
    node: String,
    rust: String,
}

impl Default for Templates {
    fn default() -> Self {
        Templates {
            node: NODE_DOCKERFILE.into(),
            rust: RUST_DOCKERFILE.into(),
        }
    }
}

impl Templates {
    /// Built-in templates, replaced by `Dockerfile.node` / `Dockerfile.rust`
    /// from `dir` where those exist.
    pub fn load(dir: Option<&Path>) -> io::Result<Templates> {
        let dir = match dir {
            Some(dir) => dir,
            None => return Ok(Templates::default()),
        };

        let read = |runtime: Runtime| -> io::Result<String> {
            let path = dir.join(runtime.template_file_name());
            if path.is_file() {
                debug!("using template override {:?}", path);
                fs::read_to_string(path)
            } else {
                Ok(runtime.builtin_template().into())
            }
        };

        Ok(Templates {
            node: read(Runtime::Node)?,
            rust: read(Runtime::Rust)?,
        })
    }

    pub fn get(&self, runtime: Runtime) -> &str {
        match runtime {
            Runtime::Node => &self.node,
            Runtime::Rust => &self.rust,
        }
    }
}
