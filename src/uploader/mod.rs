//! File upload endpoint.
//!
//! An [`Uploader`] stores the file parts of multipart uploads under a root
//! directory and serves them back. Mounted on a [`Router`] under a base path
//! it registers:
//!
//! - `POST {base}/upload`: store every file part, answer with a JSON summary
//! - `GET {base}/list`: the stored files as JSON
//! - `GET {base}/download/:name`: one stored file (byte ranges honoured)
//! - `POST {base}/delete/:name`: remove one stored file
//! - `POST {base}/move`: rename a stored file (refused unless enabled)
//! - `POST {base}/create`: make a directory under the root (refused unless
//!   enabled)

mod filename;
mod tests;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::files::{create_unique, TempFile};
use crate::parser::{BodyKind, Error as ParserError, HttpRequest, Method, Part, PartData, RequestBody};
use crate::server::{Error, HttpResponse, Router, ServerConfig, StatusCode};

pub use filename::{sanitize_filename, MAX_FILENAME_BYTES};

/// Something the uploader changed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// A file was stored at this path.
    Uploaded(PathBuf),
    /// The file at this path was deleted.
    Deleted(PathBuf),
    /// A stored file was renamed.
    Moved { from: PathBuf, to: PathBuf },
    /// A directory was created at this path.
    DirectoryCreated(PathBuf),
}

/// Callback invoked after every upload and deletion.
pub type UploadHook = Arc<dyn Fn(&UploadEvent) + Send + Sync>;

/// One stored file part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    /// The form field the part came from.
    pub field: String,
    /// The filename the client sent.
    pub original_name: String,
    /// The name on disk, after sanitizing and disambiguation.
    pub stored_name: String,
    pub size: u64,
}

/// An entry of `GET {base}/list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedFile {
    pub name: String,
    pub size: u64,
}

#[derive(Serialize)]
struct UploadSummary<'a> {
    files: &'a [StoredFile],
}

#[derive(Serialize)]
struct FileList<'a> {
    files: &'a [ListedFile],
}

/// Stores uploaded files under a root directory.
pub struct Uploader {
    root: PathBuf,
    allowed_extensions: Vec<String>,
    hook: Option<UploadHook>,
    allow_move: bool,
    allow_create_directory: bool,
}

impl fmt::Debug for Uploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uploader")
            .field("root", &self.root)
            .field("allowed_extensions", &self.allowed_extensions)
            .field("hook", &self.hook.is_some())
            .field("allow_move", &self.allow_move)
            .field("allow_create_directory", &self.allow_create_directory)
            .finish()
    }
}

impl Uploader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            allowed_extensions: Vec::new(),
            hook: None,
            allow_move: false,
            allow_create_directory: false,
        }
    }

    /// An uploader storing into the configured upload root.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.upload_root_directory.clone())
    }

    /// Only accept files with one of `extensions` (case-insensitive, with or
    /// without the leading dot). Uploads of other files fail with `Forbidden`.
    pub fn with_allowed_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Call `hook` after each stored or deleted file.
    pub fn with_hook(mut self, hook: impl Fn(&UploadEvent) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Serve `POST {base}/move`. Without this, moves fail with `Forbidden`.
    pub fn with_move(mut self, allowed: bool) -> Self {
        self.allow_move = allowed;
        self
    }

    /// Serve `POST {base}/create`. Without this, directory creation fails
    /// with `Forbidden`.
    pub fn with_create_directory(mut self, allowed: bool) -> Self {
        self.allow_create_directory = allowed;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register the upload routes under `base` (e.g. `""` or `"/books"`).
    pub fn mount(self: Arc<Self>, router: &mut Router, base: &str) -> Result<(), Error> {
        let base = base.trim_end_matches('/');
        let root = self.root.display().to_string();

        let uploader = Arc::clone(&self);
        router.register_with_body(Method::POST, &format!("{base}/upload"), BodyKind::MultipartForm, move |req| {
            let uploader = Arc::clone(&uploader);
            async move { uploader.handle_upload(req).await }
        })?;

        let uploader = Arc::clone(&self);
        router.register(Method::GET, &format!("{base}/list"), move |_req| {
            let uploader = Arc::clone(&uploader);
            async move {
                let files = uploader.list().await?;
                HttpResponse::new(StatusCode::Ok).with_json(&FileList { files: &files })
            }
        })?;

        let uploader = Arc::clone(&self);
        router.register(Method::GET, &format!("{base}/download/:name"), move |req| {
            let uploader = Arc::clone(&uploader);
            async move { uploader.handle_download(req).await }
        })?;

        let uploader = Arc::clone(&self);
        router.register_with_body(Method::POST, &format!("{base}/move"), BodyKind::UrlEncodedForm, move |req| {
            let uploader = Arc::clone(&uploader);
            async move {
                let from = form_field(&req, "from");
                let to = form_field(&req, "to");
                let path = uploader.move_file(from, to).await?;
                HttpResponse::new(StatusCode::Ok).with_json(&serde_json::json!({ "moved": file_name(&path) }))
            }
        })?;

        let uploader = Arc::clone(&self);
        router.register_with_body(Method::POST, &format!("{base}/create"), BodyKind::UrlEncodedForm, move |req| {
            let uploader = Arc::clone(&uploader);
            async move {
                let path = uploader.create_directory(form_field(&req, "name")).await?;
                HttpResponse::new(StatusCode::Created).with_json(&serde_json::json!({ "created": file_name(&path) }))
            }
        })?;

        let uploader = self;
        router.register(Method::POST, &format!("{base}/delete/:name"), move |req| {
            let uploader = Arc::clone(&uploader);
            async move {
                let name = req.param("name").unwrap_or_default();
                let path = uploader.delete(name).await?;
                HttpResponse::new(StatusCode::Ok).with_json(&serde_json::json!({ "deleted": file_name(&path) }))
            }
        })?;

        info!("Uploader mounted at {base}/ storing into {root}");
        Ok(())
    }

    async fn handle_upload(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        let RequestBody::MultipartForm(form) = request.body else {
            return Err(ParserError::MalformedMultipart("expected a multipart/form-data body".to_string()).into());
        };

        // Validate every part before writing any of them.
        let parts: Vec<(Part, String)> = form
            .parts
            .into_iter()
            .filter(|part| part.is_file())
            .map(|part| {
                let name = self.check_name(part.filename.as_deref().unwrap_or_default())?;
                Ok((part, name))
            })
            .collect::<Result<_, Error>>()?;
        if parts.is_empty() {
            return Err(ParserError::MalformedMultipart("no file parts in upload".to_string()).into());
        }

        let mut stored = Vec::with_capacity(parts.len());
        for (part, name) in parts {
            stored.push(self.store_part(part, &name).await?);
        }
        HttpResponse::new(StatusCode::Created).with_json(&UploadSummary { files: &stored })
    }

    async fn handle_download(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        let name = sanitize_filename(request.param("name").unwrap_or_default())?;
        let path = self.root.join(&name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(Error::NotFound(name)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::NotFound(name)),
            Err(e) => return Err(e.into()),
        }
        let disposition = format!("attachment; filename=\"{}\"", name.replace('"', "\\\""));
        Ok(HttpResponse::file(path).with_header("Content-Disposition", disposition))
    }

    /// Sanitize `original` and check it against the extension allow-list.
    fn check_name(&self, original: &str) -> Result<String, Error> {
        let name = sanitize_filename(original)?;
        if !self.allowed_extensions.is_empty() {
            let allowed = filename::extension_of(&name).is_some_and(|ext| self.allowed_extensions.contains(&ext));
            if !allowed {
                warn!("Refusing upload of {name}: file type not allowed");
                return Err(Error::Forbidden(format!("file type not allowed: {name}")));
            }
        }
        Ok(name)
    }

    /// Store one part under the root as `name`, or a numbered variant if
    /// that name is taken. A partially written file is removed.
    pub async fn store_part(&self, part: Part, name: &str) -> Result<StoredFile, Error> {
        tokio::fs::create_dir_all(&self.root).await?;
        let size = part.data.len();
        let (guard, mut file) = create_unique(&self.root, name).await?;
        match part.data {
            PartData::Bytes(data) => {
                file.write_all(&data).await?;
                file.flush().await?;
                file.sync_all().await?;
                drop(file);
            }
            PartData::File(body) => {
                // The staged part replaces the reserved, still empty file.
                drop(file);
                body.persist(guard.path()).await?;
            }
        }
        let path = guard.keep();

        let stored_name = file_name(&path);
        info!("Stored upload {stored_name} ({size} bytes)");
        self.fire(UploadEvent::Uploaded(path));

        Ok(StoredFile {
            field: part.name,
            original_name: part.filename.unwrap_or_default(),
            stored_name,
            size,
        })
    }

    /// The regular, non-hidden files under the root, sorted by name.
    pub async fn list(&self) -> Result<Vec<ListedFile>, Error> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() {
                files.push(ListedFile { name, size: meta.len() });
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Delete the stored file `name`.
    pub async fn delete(&self, name: &str) -> Result<PathBuf, Error> {
        let name = sanitize_filename(name)?;
        let path = self.root.join(&name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::NotFound(name)),
            Err(e) => return Err(e.into()),
        }
        info!("Deleted {name}");
        self.fire(UploadEvent::Deleted(path.clone()));
        Ok(path)
    }

    /// Rename the stored file `from` to `to`, which must not exist yet.
    ///
    /// Refused with `Forbidden` unless enabled with [`with_move`](Self::with_move).
    pub async fn move_file(&self, from: &str, to: &str) -> Result<PathBuf, Error> {
        if !self.allow_move {
            warn!("Refusing to move {from}: moving is disabled");
            return Err(Error::Forbidden("moving files is disabled".to_string()));
        }
        let from = sanitize_filename(from)?;
        let to = self.check_name(to)?;
        let source = self.root.join(&from);
        match tokio::fs::metadata(&source).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(Error::NotFound(from)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::NotFound(from)),
            Err(e) => return Err(e.into()),
        }

        // Claim the destination first so that an existing file is never replaced.
        let dest = self.root.join(&to);
        match tokio::fs::OpenOptions::new().write(true).create_new(true).open(&dest).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(Error::AlreadyExists(to)),
            Err(e) => return Err(e.into()),
        }
        let reserved = TempFile::guard(dest);
        tokio::fs::rename(&source, reserved.path()).await?;
        let dest = reserved.keep();

        info!("Moved {from} to {to}");
        self.fire(UploadEvent::Moved {
            from: source,
            to: dest.clone(),
        });
        Ok(dest)
    }

    /// Create the directory `name` under the root.
    ///
    /// Refused with `Forbidden` unless enabled with
    /// [`with_create_directory`](Self::with_create_directory).
    pub async fn create_directory(&self, name: &str) -> Result<PathBuf, Error> {
        if !self.allow_create_directory {
            warn!("Refusing to create {name}: directory creation is disabled");
            return Err(Error::Forbidden("creating directories is disabled".to_string()));
        }
        let name = sanitize_filename(name)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(&name);
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(Error::AlreadyExists(name)),
            Err(e) => return Err(e.into()),
        }
        info!("Created directory {name}");
        self.fire(UploadEvent::DirectoryCreated(path.clone()));
        Ok(path)
    }

    fn fire(&self, event: UploadEvent) {
        match &self.hook {
            Some(hook) => hook(&event),
            None => debug!("No upload hook for {event:?}"),
        }
    }
}

fn form_field<'a>(request: &'a HttpRequest, name: &str) -> &'a str {
    match &request.body {
        RequestBody::UrlEncodedForm(form) => form.get(name).unwrap_or_default(),
        _ => "",
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}
