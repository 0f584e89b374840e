//! Immutable in-memory file tree served by the HTTP server.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use rust_embed::RustEmbed;

use crate::paths;

#[derive(RustEmbed)]
#[folder = "static/"]
struct EmbeddedStatic;

#[derive(Debug, Clone)]
pub struct Asset {
    data: Cow<'static, [u8]>,
    content_type: String,
    etag: String,
}

impl Asset {
    fn new(key: &str, data: Cow<'static, [u8]>) -> Self {
        let content_type = mime_guess::from_path(key)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let content_type = if content_type.starts_with("text/") {
            format!("{content_type}; charset=utf-8")
        } else {
            content_type
        };
        let mut hasher = DefaultHasher::new();
        data.hash(&mut hasher);
        let etag = format!("\"{:x}-{:016x}\"", data.len(), hasher.finish());
        Self {
            data,
            content_type,
            etag,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn etag(&self) -> &str {
        &self.etag
    }

    /// Whether a client holding one of the `If-None-Match` validators
    /// already has this content. Weak validators compare equal to ours.
    pub fn is_cached_by(&self, if_none_match: Option<&str>) -> bool {
        let Some(validators) = if_none_match.map(str::trim) else {
            return false;
        };
        validators == "*"
            || validators.split(',').any(|validator| {
                let validator = validator.trim();
                validator.strip_prefix("W/").unwrap_or(validator) == self.etag
            })
    }
}

/// Read-only mapping from `/`-separated relative paths to file contents.
#[derive(Debug, Clone, Default)]
pub struct StaticTree {
    files: BTreeMap<String, Asset>,
}

impl StaticTree {
    /// The `static/` directory compiled into the binary.
    pub fn embedded() -> Self {
        Self::from_entries(EmbeddedStatic::iter().filter_map(|name| {
            EmbeddedStatic::get(&name).map(|file| (name.into_owned(), file.data))
        }))
    }

    pub fn from_entries<I, K, D>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, D)>,
        K: Into<String>,
        D: Into<Cow<'static, [u8]>>,
    {
        let files = entries
            .into_iter()
            .map(|(key, data)| {
                let key = key.into();
                let asset = Asset::new(&key, data.into());
                (key, asset)
            })
            .collect();
        Self { files }
    }

    /// Reads every regular file below `root` into memory.
    pub fn from_dir(root: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let listing = fs::read_dir(&dir)
                .with_context(|| format!("cannot read directory {}", dir.display()))?;
            for entry in listing {
                let entry =
                    entry.with_context(|| format!("cannot read directory {}", dir.display()))?;
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .with_context(|| format!("cannot stat {}", path.display()))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let relative = path.strip_prefix(root).with_context(|| {
                    format!("{} is outside {}", path.display(), root.display())
                })?;
                let key = paths::tree_key(relative)
                    .ok_or_else(|| anyhow!("unsupported file name {}", relative.display()))?;
                let data = fs::read(&path)
                    .with_context(|| format!("cannot read file {}", path.display()))?;
                entries.push((key, data));
            }
        }
        Ok(Self::from_entries(entries))
    }

    pub fn get(&self, key: &str) -> Option<&Asset> {
        self.files.get(key)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// True when some file lives below `dir`. `dir` is empty or ends in `/`.
    pub fn has_dir(&self, dir: &str) -> bool {
        self.files
            .range(dir.to_string()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(dir) && key.len() > dir.len())
    }

    /// Immediate children of `dir`, sorted; subdirectories end in `/`.
    pub fn children(&self, dir: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for key in self
            .files
            .range(dir.to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(dir))
        {
            let rest = &key[dir.len()..];
            let name = match rest.find('/') {
                Some(idx) => &rest[..=idx],
                None => rest,
            };
            if names.last().map(String::as_str) != Some(name) {
                names.push(name.to_string());
            }
        }
        names
    }
}
