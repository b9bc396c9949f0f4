use ignore::{
    gitignore::{Gitignore, GitignoreBuilder},
    WalkBuilder,
};
use std::{
    borrow::Cow,
    ffi::OsStr,
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
};

use crate::models::ContentHash;

pub const DOCKERIGNORE: &str = ".dockerignore";

/// Files the build tool sends even when `.dockerignore` lists them.
const ALWAYS_SENT: [&str; 2] = ["Dockerfile", DOCKERIGNORE];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// A link, kept as a link. Its target is not read.
    Symlink(PathBuf),
}

/// One path of a build context, as it ends up in the archive.
#[derive(Clone, Debug)]
pub struct ContextEntry {
    pub path: PathBuf,
    pub relative: PathBuf,
    pub kind: EntryKind,
    key: Vec<u8>,
}

impl ContextEntry {
    /// The relative path as raw bytes with `/` separators.
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

/// Exclusions read from the `.dockerignore` at the root of the context.
/// Patterns are anchored at the root, like the build tool reads them, and
/// `.dockerignore` files further down are plain files.
#[derive(Clone, Debug)]
pub struct ContextFilter {
    matcher: Gitignore,
}

impl ContextFilter {
    pub fn load(context: &Path) -> io::Result<ContextFilter> {
        let mut builder = GitignoreBuilder::new(context);
        let path = context.join(DOCKERIGNORE);

        if path.is_file() {
            for line in fs::read_to_string(&path)?.lines() {
                if let Some(pattern) = anchored_pattern(line) {
                    builder.add_line(None, &pattern).map_err(walk_error)?;
                }
            }
        }

        let matcher = builder.build().map_err(walk_error)?;
        Ok(ContextFilter { matcher })
    }

    pub fn is_excluded(&self, relative: &Path, is_dir: bool) -> bool {
        if relative.as_os_str().is_empty() {
            return false;
        }
        if relative.parent() == Some(Path::new(""))
            && ALWAYS_SENT.iter().any(|name| relative == Path::new(name))
        {
            return false;
        }

        self.matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }
}

fn anchored_pattern(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (negated, pattern) = match line.strip_prefix('!') {
        Some(pattern) => (true, pattern.trim_start()),
        None => (false, line),
    };
    let pattern = pattern.trim_start_matches("./").trim_start_matches('/');
    if pattern.is_empty() {
        return None;
    }

    Some(format!("{}/{}", if negated { "!" } else { "" }, pattern))
}

fn walk_error(err: ignore::Error) -> io::Error {
    match err.into_io_error() {
        Some(err) => err,
        None => io::Error::new(io::ErrorKind::Other, "failed to walk build context"),
    }
}

#[cfg(unix)]
fn os_bytes(name: &OsStr) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(name.as_bytes())
}

#[cfg(not(unix))]
fn os_bytes(name: &OsStr) -> Cow<'_, [u8]> {
    Cow::Owned(name.to_string_lossy().into_owned().into_bytes())
}

fn path_key(relative: &Path) -> Vec<u8> {
    let mut key = Vec::new();
    for (index, component) in relative.components().enumerate() {
        if index > 0 {
            key.push(b'/');
        }
        key.extend_from_slice(&os_bytes(component.as_os_str()));
    }
    key
}

/// Every path the build tool would receive, sorted by raw path bytes. Links
/// are not followed.
pub fn context_entries(context: &Path) -> io::Result<Vec<ContextEntry>> {
    let filter = ContextFilter::load(context)?;
    let root = context.to_path_buf();

    let walk = WalkBuilder::new(context)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            match entry.path().strip_prefix(&root) {
                Ok(relative) => !filter.is_excluded(relative, is_dir),
                Err(_) => true,
            }
        })
        .build();

    let mut entries = Vec::new();

    for entry in walk {
        let entry = entry.map_err(walk_error)?;
        let relative = entry
            .path()
            .strip_prefix(context)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
            .to_path_buf();
        if relative.as_os_str().is_empty() {
            continue;
        }

        let kind = match entry.file_type() {
            Some(t) if t.is_symlink() => EntryKind::Symlink(fs::read_link(entry.path())?),
            Some(t) if t.is_dir() => EntryKind::Dir,
            Some(t) if t.is_file() => EntryKind::File,
            _ => continue,
        };

        entries.push(ContextEntry {
            path: entry.path().to_path_buf(),
            key: path_key(&relative),
            relative,
            kind,
        });
    }

    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

fn update_bytes(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Digest over every entry of the context: its kind, its relative path, and
/// then a file's length and bytes or a link's target. Independent of where
/// the context lives on disk.
pub fn hash_context(context: &Path) -> io::Result<ContentHash> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; 64 * 1024];

    for entry in context_entries(context)? {
        match &entry.kind {
            EntryKind::Dir => {
                hasher.update(b"d");
                update_bytes(&mut hasher, entry.key());
            }
            EntryKind::Symlink(target) => {
                hasher.update(b"l");
                update_bytes(&mut hasher, entry.key());
                update_bytes(&mut hasher, &path_key(target));
            }
            EntryKind::File => {
                hasher.update(b"f");
                update_bytes(&mut hasher, entry.key());

                let mut file = File::open(&entry.path)?;
                hasher.update(&file.metadata()?.len().to_le_bytes());
                loop {
                    let n = file.read(&mut buffer)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buffer[..n]);
                }
            }
        }
    }

    Ok(ContentHash(hasher.finalize().to_hex().to_string()))
}
