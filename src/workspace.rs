use crate::error::DocumentError;
use crate::utils::{normalize, path_to_uri, uri_to_path};
use log::{debug, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

/// Identifies a document: either directly by URI, or as the target of an
/// `import` written in another document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSpec {
    Uri(String),
    Import { path: String, importer: String },
}

/// The current text of a document. `version` is opaque and only compared
/// for equality; `None` means "always re-parse".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    pub version: Option<i64>,
    pub resolved_uri: String,
}

pub trait DocumentStore {
    fn get(&self, spec: &FileSpec) -> Result<Document, DocumentError>;

    /// Records editor-owned text for `uri`; it shadows whatever is on disk.
    fn open(&mut self, uri: &str, text: &str, version: Option<i64>);

    fn close(&mut self, uri: &str);

    /// The URI an import would load, if it can be found.
    fn resolve_import(&self, path: &str, importer: &str) -> Option<String>;
}

pub trait PathExists {
    fn exists(&self, path: &Path) -> bool;
}

/// Checks candidates against the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsPaths;

impl PathExists for FsPaths {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Finds the file an import refers to. Relative imports are tried against
/// the importing file's directory, then the working directory, then each
/// library path in order.
#[derive(Debug, Clone, Default)]
pub struct LibPathResolver {
    pub working_dir: PathBuf,
    pub lib_paths: Vec<PathBuf>,
}

impl LibPathResolver {
    pub fn new(working_dir: impl Into<PathBuf>, lib_paths: Vec<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            lib_paths,
        }
    }

    /// Candidate paths for `path` imported from `importer`, in search order.
    pub fn candidates(&self, path: &str, importer: &str) -> Vec<PathBuf> {
        let import = Path::new(path);
        if import.is_absolute() {
            return vec![normalize(import)];
        }

        let mut dirs = Vec::new();
        if let Some(dir) = uri_to_path(importer).and_then(|p| p.parent().map(Path::to_path_buf)) {
            dirs.push(dir);
        }
        dirs.push(self.working_dir.clone());
        dirs.extend(self.lib_paths.iter().cloned());

        let mut out: Vec<PathBuf> = Vec::new();
        for dir in dirs {
            let candidate = normalize(&dir.join(import));
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        }
        out
    }

    /// Returns the `file://` URI of the first existing candidate.
    pub fn resolve(&self, path: &str, importer: &str, paths: &dyn PathExists) -> Option<String> {
        let found = self
            .candidates(path, importer)
            .into_iter()
            .find(|candidate| paths.exists(candidate));
        match &found {
            Some(hit) => debug!("import '{path}' from {importer} resolved to {}", hit.display()),
            None => debug!("import '{path}' from {importer} not found"),
        }
        found.map(|p| path_to_uri(&p))
    }
}

#[derive(Debug, Clone)]
struct OpenDocument {
    text: String,
    version: Option<i64>,
}

#[derive(Debug, Clone)]
struct DiskEntry {
    modified: Option<i64>,
    text: String,
}

/// Serves editor-open documents first and falls back to the filesystem.
/// Disk reads are cached and keyed by modification time.
#[derive(Debug, Default)]
pub struct FsDocumentStore {
    resolver: LibPathResolver,
    open: HashMap<String, OpenDocument>,
    disk: Mutex<HashMap<PathBuf, DiskEntry>>,
}

impl FsDocumentStore {
    pub fn new(resolver: LibPathResolver) -> Self {
        Self {
            resolver,
            open: HashMap::new(),
            disk: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &LibPathResolver {
        &self.resolver
    }

    pub fn set_lib_paths(&mut self, lib_paths: Vec<PathBuf>) {
        self.resolver.lib_paths = lib_paths;
    }

    fn read_disk(&self, uri: &str) -> Result<Document, DocumentError> {
        let path = uri_to_path(uri).ok_or_else(|| DocumentError::InvalidUri {
            uri: uri.to_string(),
        })?;
        let read_err = |e: std::io::Error| DocumentError::Read {
            path: path.clone(),
            reason: e.to_string(),
        };

        let metadata = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DocumentError::NotFound {
                    path: path.display().to_string(),
                }
            } else {
                read_err(e)
            }
        })?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64);

        let mut disk = self.disk.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = disk.get(&path) {
            if entry.modified.is_some() && entry.modified == modified {
                debug!("disk cache hit for {}", path.display());
                return Ok(Document {
                    text: entry.text.clone(),
                    version: modified,
                    resolved_uri: uri.to_string(),
                });
            }
        }

        let text = std::fs::read_to_string(&path).map_err(|e| {
            warn!("failed to read {}: {e}", path.display());
            read_err(e)
        })?;
        disk.insert(
            path.clone(),
            DiskEntry {
                modified,
                text: text.clone(),
            },
        );
        Ok(Document {
            text,
            version: modified,
            resolved_uri: uri.to_string(),
        })
    }
}

impl DocumentStore for FsDocumentStore {
    fn get(&self, spec: &FileSpec) -> Result<Document, DocumentError> {
        let uri = match spec {
            FileSpec::Uri(uri) => uri.clone(),
            FileSpec::Import { path, importer } => self
                .resolve_import(path, importer)
                .ok_or_else(|| DocumentError::NotFound { path: path.clone() })?,
        };
        match self.open.get(&uri) {
            Some(doc) => Ok(Document {
                text: doc.text.clone(),
                version: doc.version,
                resolved_uri: uri,
            }),
            None => self.read_disk(&uri),
        }
    }

    fn open(&mut self, uri: &str, text: &str, version: Option<i64>) {
        if let Some(path) = uri_to_path(uri) {
            self.disk
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&path);
        }
        self.open.insert(
            uri.to_string(),
            OpenDocument {
                text: text.to_string(),
                version,
            },
        );
    }

    fn close(&mut self, uri: &str) {
        self.open.remove(uri);
    }

    fn resolve_import(&self, path: &str, importer: &str) -> Option<String> {
        let open = OpenOrDisk { open: &self.open };
        self.resolver.resolve(path, importer, &open)
    }
}

/// An import may target an unsaved editor buffer as well as a file on disk.
struct OpenOrDisk<'a> {
    open: &'a HashMap<String, OpenDocument>,
}

impl PathExists for OpenOrDisk<'_> {
    fn exists(&self, path: &Path) -> bool {
        self.open.contains_key(&path_to_uri(path)) || FsPaths.exists(path)
    }
}

/// A store backed only by memory, keyed by `file://` URI.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    resolver: LibPathResolver,
    docs: HashMap<String, OpenDocument>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_resolver(LibPathResolver::new("/", Vec::new()))
    }

    pub fn with_resolver(resolver: LibPathResolver) -> Self {
        Self {
            resolver,
            docs: HashMap::new(),
        }
    }

    /// Adds a document at `path`, returning its URI.
    pub fn insert(&mut self, path: impl AsRef<Path>, text: &str) -> String {
        let uri = path_to_uri(&normalize(path.as_ref()));
        self.open(&uri, text, Some(0));
        uri
    }
}

impl PathExists for InMemoryDocumentStore {
    fn exists(&self, path: &Path) -> bool {
        self.docs.contains_key(&path_to_uri(path))
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(&self, spec: &FileSpec) -> Result<Document, DocumentError> {
        let uri = match spec {
            FileSpec::Uri(uri) => uri.clone(),
            FileSpec::Import { path, importer } => self
                .resolve_import(path, importer)
                .ok_or_else(|| DocumentError::NotFound { path: path.clone() })?,
        };
        let doc = self
            .docs
            .get(&uri)
            .ok_or_else(|| DocumentError::NotFound { path: uri.clone() })?;
        Ok(Document {
            text: doc.text.clone(),
            version: doc.version,
            resolved_uri: uri,
        })
    }

    fn open(&mut self, uri: &str, text: &str, version: Option<i64>) {
        self.docs.insert(
            uri.to_string(),
            OpenDocument {
                text: text.to_string(),
                version,
            },
        );
    }

    fn close(&mut self, uri: &str) {
        self.docs.remove(uri);
    }

    fn resolve_import(&self, path: &str, importer: &str) -> Option<String> {
        self.resolver.resolve(path, importer, self)
    }
}
