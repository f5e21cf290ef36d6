// src/files.rs
//
// =============================================================================
// ESMRUN: FILE DESCRIPTORS & MANIFESTS (v 0.1 )
// =============================================================================
//
// Which files a component needs, and how they get where they belong.
//
// Responsibilities:
// 1. Parse declarative file tables (JSON) into typed manifests.
// 2. Merge layered tables: default -> modify -> environment. Later wins, wholesale.
// 3. Digest: copy or link every entry onto the filesystem, aggregating failures.
//
// A manifest is category -> identifier -> descriptor. BTreeMaps keep every
// iteration (and therefore every log and every digest) in a stable order.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::{EnvSource, TableStage};
use crate::error::{EngineError, Result, TransferFailure};

// ============================================================================
// 1. FILE DESCRIPTOR
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyMethod {
    #[default]
    Copy,
    Link,
}

impl CopyMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyMethod::Copy => "copy",
            CopyMethod::Link => "link",
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            CopyMethod::Copy => "copied",
            CopyMethod::Link => "linked",
        }
    }
}

impl FromStr for CopyMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "copy" => Ok(CopyMethod::Copy),
            "link" => Ok(CopyMethod::Link),
            other => Err(format!(
                "copy_method must be \"copy\" or \"link\", got \"{other}\""
            )),
        }
    }
}

/// A single file transfer. Immutable: the `with_*` methods return new values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    #[serde(skip)]
    id: String,
    src: PathBuf,
    dest: PathBuf,
    copy_method: CopyMethod,
}

impl FileDescriptor {
    pub fn new(
        id: impl Into<String>,
        src: impl Into<PathBuf>,
        dest: impl Into<PathBuf>,
        copy_method: CopyMethod,
    ) -> Self {
        Self {
            id: id.into(),
            src: src.into(),
            dest: dest.into(),
            copy_method,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn src(&self) -> &Path {
        &self.src
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    pub fn copy_method(&self) -> CopyMethod {
        self.copy_method
    }

    pub fn with_src(&self, src: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            ..self.clone()
        }
    }

    pub fn with_dest(&self, dest: impl Into<PathBuf>) -> Self {
        Self {
            dest: dest.into(),
            ..self.clone()
        }
    }

    pub fn with_copy_method(&self, copy_method: CopyMethod) -> Self {
        Self {
            copy_method,
            ..self.clone()
        }
    }

    /// Performs the transfer. Returns the path actually written.
    fn transfer(&self) -> io::Result<PathBuf> {
        if !self.src.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "source does not exist",
            ));
        }

        // An existing directory as destination means "put it in there".
        let mut dest = self.dest.clone();
        if dest.is_dir() {
            if let Some(name) = self.src.file_name() {
                dest.push(name);
            }
        }

        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Copying onto itself truncates the source; linking onto itself
        // removes it.
        if refers_to_source(&self.src, &dest)? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "source and destination are the same file",
            ));
        }

        // Never write through a stale link, never fail on an existing link.
        if let Ok(meta) = dest.symlink_metadata() {
            if meta.file_type().is_symlink() || self.copy_method == CopyMethod::Link {
                fs::remove_file(&dest)?;
            }
        }

        match self.copy_method {
            CopyMethod::Copy => {
                fs::copy(&self.src, &dest)?;
            }
            CopyMethod::Link => {
                let target = if self.src.is_absolute() {
                    self.src.clone()
                } else {
                    std::env::current_dir()?.join(&self.src)
                };
                make_link(&target, &dest)?;
            }
        }

        Ok(dest)
    }
}

impl fmt::Display for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -- {} --> {}",
            self.src.display(),
            self.copy_method.verb(),
            self.dest.display()
        )
    }
}

#[cfg(unix)]
fn make_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_link(target: &Path, link: &Path) -> io::Result<()> {
    fs::hard_link(target, link)
}

/// True when writing `dest` would clobber `src`: both name the same directory
/// entry, or `dest` is a real file sharing `src`'s content. A `dest` that is
/// merely a link to `src` is safe to replace.
fn refers_to_source(src: &Path, dest: &Path) -> io::Result<bool> {
    let Ok(dest_meta) = dest.symlink_metadata() else {
        return Ok(false);
    };
    if let (Some(a), Some(b)) = (resolved_entry(src), resolved_entry(dest)) {
        if a == b {
            return Ok(true);
        }
    }
    if dest_meta.file_type().is_symlink() {
        return Ok(false);
    }
    same_file(src, dest)
}

/// The path with its parent directory canonicalised and its last component
/// left alone, so a link is not followed.
fn resolved_entry(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Some(parent.canonicalize().ok()?.join(name))
}

#[cfg(unix)]
fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let (a, b) = (fs::metadata(a)?, fs::metadata(b)?);
    Ok(a.dev() == b.dev() && a.ino() == b.ino())
}

#[cfg(not(unix))]
fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    Ok(a.canonicalize()? == b.canonicalize()?)
}

/// Last path component as a string, if any.
pub fn base_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

// ============================================================================
// 2. FILE MANIFEST
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FileManifest {
    entries: BTreeMap<String, BTreeMap<String, FileDescriptor>>,
}

impl FileManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or replaces) the descriptor under its own identifier.
    pub fn insert(&mut self, category: impl Into<String>, file: FileDescriptor) {
        self.entries
            .entry(category.into())
            .or_default()
            .insert(file.id.clone(), file);
    }

    /// Dynamically typed assignment. Only objects (`{src, dest, copy_method}`)
    /// and positional arrays (`[src, dest, copy_method]`) describe a file;
    /// anything else is rejected with `TypeGuard`.
    pub fn assign(&mut self, category: &str, id: &str, value: &Value) -> Result<()> {
        let file = parse_entry("<assigned>", TableStage::Prepare, category, id, value)?;
        self.insert(category, file);
        Ok(())
    }

    pub fn get(&self, category: &str, id: &str) -> Option<&FileDescriptor> {
        self.entries.get(category)?.get(id)
    }

    pub fn remove(&mut self, category: &str, id: &str) -> Option<FileDescriptor> {
        let files = self.entries.get_mut(category)?;
        let removed = files.remove(id);
        if files.is_empty() {
            self.entries.remove(category);
        }
        removed
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn category(&self, category: &str) -> impl Iterator<Item = &FileDescriptor> {
        self.entries.get(category).into_iter().flat_map(|f| f.values())
    }

    pub fn category_len(&self, category: &str) -> usize {
        self.entries.get(category).map_or(0, BTreeMap::len)
    }

    /// Every (category, descriptor) pair in stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileDescriptor)> {
        self.entries
            .iter()
            .flat_map(|(cat, files)| files.values().map(move |f| (cat.as_str(), f)))
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------------
    // LOADING
    // ------------------------------------------------------------------------

    /// Reads a declarative file table.
    ///
    /// Prepare tables must give `src` and `dest` for every entry. Cleanup
    /// tables name files without directories, so either field may stand in
    /// for the other.
    pub fn load(path: impl AsRef<Path>, stage: TableStage) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let manifest = Self::from_json_str(&text, &path.display().to_string(), stage)?;
        log::debug!(
            "Loaded {} file(s) in {} categories from {}",
            manifest.len(),
            manifest.entries.len(),
            path.display()
        );
        Ok(manifest)
    }

    /// Parses table text. `origin` only labels error messages.
    pub fn from_json_str(text: &str, origin: &str, stage: TableStage) -> Result<Self> {
        let parse_err = |reason: String| EngineError::Parse {
            path: origin.to_string(),
            reason,
        };

        let root: Value = serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))?;
        let categories = match root {
            Value::Object(categories) => categories,
            other => {
                return Err(parse_err(format!(
                    "top level must be an object of categories, got {}",
                    json_kind(&other)
                )))
            }
        };

        let mut manifest = Self::new();
        for (category, files) in &categories {
            let Value::Object(files) = files else {
                return Err(parse_err(format!(
                    "category '{category}' must map identifiers to files, got {}",
                    json_kind(files)
                )));
            };
            for (id, value) in files {
                let file = parse_entry(origin, stage, category, id, value)?;
                manifest.insert(category.as_str(), file);
            }
        }
        Ok(manifest)
    }

    // ------------------------------------------------------------------------
    // LAYERING
    // ------------------------------------------------------------------------

    /// `overrides` replaces matching (category, id) entries wholesale, adds
    /// new ones and leaves the rest of `base` alone.
    pub fn merge(base: &FileManifest, overrides: &FileManifest) -> FileManifest {
        let mut merged = base.clone();
        merged.merge_from(overrides);
        merged
    }

    pub fn merge_from(&mut self, overrides: &FileManifest) {
        for (category, file) in overrides.iter() {
            self.insert(category, file.clone());
        }
    }

    /// Replaces `src` of every entry whose identifier is set in `env`.
    /// Returns how many entries were overridden.
    pub fn override_from_environment(&mut self, env: &EnvSource) -> usize {
        let mut count = 0;
        for (category, files) in self.entries.iter_mut() {
            for (id, file) in files.iter_mut() {
                if let Some(src) = env.get(id) {
                    log::info!(
                        "Environment overrides {}/{}: {} -> {}",
                        category,
                        id,
                        file.src.display(),
                        src
                    );
                    *file = file.with_src(src);
                    count += 1;
                }
            }
        }
        count
    }

    // ------------------------------------------------------------------------
    // DIGEST
    // ------------------------------------------------------------------------

    /// Materialises every entry and returns how many were transferred. Keeps
    /// going past failures; if any file failed the whole call fails with all
    /// of them listed.
    pub fn digest(&self) -> Result<usize> {
        let mut done = 0;
        let mut failures = Vec::new();

        for (_, file) in self.iter() {
            match digest_one(file) {
                Ok(()) => done += 1,
                Err(failure) => failures.push(failure),
            }
        }

        if failures.is_empty() {
            Ok(done)
        } else {
            Err(EngineError::Transfer { failures })
        }
    }

    /// Like `digest`, but pops every entry that was transferred. Entries that
    /// failed stay behind so the caller can inspect them.
    pub fn digest_and_drain(&mut self) -> Result<usize> {
        let mut done = 0;
        let mut failures = Vec::new();

        for files in self.entries.values_mut() {
            files.retain(|_, file| match digest_one(file) {
                Ok(()) => {
                    done += 1;
                    false
                }
                Err(failure) => {
                    failures.push(failure);
                    true
                }
            });
        }
        self.entries.retain(|_, files| !files.is_empty());

        if failures.is_empty() {
            Ok(done)
        } else {
            Err(EngineError::Transfer { failures })
        }
    }
}

fn digest_one(file: &FileDescriptor) -> std::result::Result<(), TransferFailure> {
    match file.transfer() {
        Ok(dest) => {
            log::info!("{}", file.with_dest(&dest));
            Ok(())
        }
        Err(e) => {
            log::error!("Failed to transfer {}: {}", file, e);
            Err(TransferFailure {
                id: file.id.clone(),
                src: file.src.clone(),
                dest: file.dest.clone(),
                reason: e.to_string(),
            })
        }
    }
}

// ============================================================================
// 3. TABLE ENTRY PARSING
// ============================================================================

fn parse_entry(
    origin: &str,
    stage: TableStage,
    category: &str,
    id: &str,
    value: &Value,
) -> Result<FileDescriptor> {
    let (src, dest, method) = match value {
        Value::Object(fields) => object_fields(origin, fields)?,
        Value::Array(items) => array_fields(origin, category, id, items)?,
        other => {
            return Err(EngineError::TypeGuard {
                category: category.to_string(),
                id: id.to_string(),
                found: json_kind(other).to_string(),
            })
        }
    };

    let missing = |field| EngineError::MissingField {
        path: origin.to_string(),
        category: category.to_string(),
        id: id.to_string(),
        field,
    };

    let (src, dest) = match (stage, src, dest) {
        (_, Some(src), Some(dest)) => (src, dest),
        (TableStage::Cleanup, Some(src), None) => (src.clone(), src),
        (TableStage::Cleanup, None, Some(dest)) => (dest.clone(), dest),
        (_, None, _) => return Err(missing("src")),
        (_, Some(_), None) => return Err(missing("dest")),
    };

    let copy_method = match method {
        Some(m) => m.parse::<CopyMethod>().map_err(|reason| EngineError::Parse {
            path: origin.to_string(),
            reason: format!("entry '{category}/{id}': {reason}"),
        })?,
        None => CopyMethod::default(),
    };

    Ok(FileDescriptor::new(id, src, dest, copy_method))
}

type RawFields = (Option<String>, Option<String>, Option<String>);

fn object_fields(origin: &str, fields: &Map<String, Value>) -> Result<RawFields> {
    let field = |key: &str| -> Result<Option<String>> {
        match fields.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(EngineError::Parse {
                path: origin.to_string(),
                reason: format!("field '{key}' must be a string, got {}", json_kind(other)),
            }),
        }
    };
    Ok((field("src")?, field("dest")?, field("copy_method")?))
}

fn array_fields(origin: &str, category: &str, id: &str, items: &[Value]) -> Result<RawFields> {
    if items.len() > 3 {
        return Err(EngineError::Parse {
            path: origin.to_string(),
            reason: format!(
                "entry '{category}/{id}' takes at most [src, dest, copy_method], got {} items",
                items.len()
            ),
        });
    }
    let mut strings = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) => strings.push(s.clone()),
            other => {
                return Err(EngineError::Parse {
                    path: origin.to_string(),
                    reason: format!(
                        "entry '{category}/{id}' items must be strings, got {}",
                        json_kind(other)
                    ),
                })
            }
        }
    }
    let mut it = strings.into_iter();
    Ok((it.next(), it.next(), it.next()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
