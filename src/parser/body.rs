//! Request body reading.
//!
//! A request body is read in exactly one of four shapes, chosen per route:
//! fully buffered data, a temporary file, a multipart form, or a url-encoded
//! form. Every shape is bounded by `Content-Length` and by the configured
//! maximum body size.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::files::TempFile;
use crate::parser::error::Error;
use crate::parser::headers::Headers;
use crate::parser::multipart::{boundary_from_content_type, parse_multipart, MultipartForm};
use crate::parser::urlencoded::{parse_urlencoded, UrlEncodedForm};

/// How a route wants its request body delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyKind {
    /// Pick from the `Content-Type` header.
    #[default]
    Auto,
    /// Buffer the body in memory.
    Data,
    /// Stream the body to a temporary file.
    File,
    /// Parse a `multipart/form-data` body.
    MultipartForm,
    /// Parse an `application/x-www-form-urlencoded` body.
    UrlEncodedForm,
}

impl BodyKind {
    fn resolve(self, headers: &Headers) -> BodyKind {
        if self != BodyKind::Auto {
            return self;
        }
        let content_type = headers.get("Content-Type").unwrap_or_default().to_ascii_lowercase();
        if content_type.starts_with("multipart/form-data") {
            BodyKind::MultipartForm
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            BodyKind::UrlEncodedForm
        } else {
            BodyKind::Data
        }
    }
}

/// A request body streamed to disk. The file is removed when this value is
/// dropped unless it was persisted.
#[derive(Debug)]
pub struct FileBody {
    temp: TempFile,
    len: u64,
    content_type: Option<String>,
}

impl FileBody {
    pub(crate) fn new(temp: TempFile, len: u64, content_type: Option<String>) -> Self {
        Self { temp, len, content_type }
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Move the body to `dest`.
    pub async fn persist(self, dest: &Path) -> io::Result<PathBuf> {
        self.temp.persist(dest).await
    }
}

/// The body of a request.
#[derive(Debug)]
pub enum RequestBody {
    Data(Vec<u8>),
    File(FileBody),
    MultipartForm(MultipartForm),
    UrlEncodedForm(UrlEncodedForm),
}

impl Default for RequestBody {
    fn default() -> Self {
        RequestBody::Data(Vec::new())
    }
}

/// Limits and locations used while reading bodies.
#[derive(Debug, Clone)]
pub struct BodyOptions {
    /// Largest accepted `Content-Length`.
    pub max_body_bytes: u64,
    /// Directory for bodies streamed to disk.
    pub temp_dir: PathBuf,
}

impl Default for BodyOptions {
    fn default() -> Self {
        Self {
            max_body_bytes: 64 * 1024 * 1024,
            temp_dir: std::env::temp_dir(),
        }
    }
}

/// The declared body length, if any.
///
/// Repeated fields and comma-separated lists are accepted only when every
/// value is the same number.
pub fn content_length(headers: &Headers) -> Result<Option<u64>, Error> {
    let mut length = None;
    for value in headers.get_all("Content-Length") {
        let invalid = || Error::InvalidHeaderValue {
            name: "Content-Length".to_string(),
            value: headers.get_all("Content-Length").collect::<Vec<_>>().join(", "),
        };
        for item in value.split(',') {
            let n = item.trim().parse::<u64>().map_err(|_| invalid())?;
            match length {
                Some(seen) if seen != n => return Err(invalid()),
                _ => length = Some(n),
            }
        }
    }
    Ok(length)
}

/// Reject transfer codings the server cannot decode.
pub fn check_transfer_encoding(headers: &Headers) -> Result<(), Error> {
    match headers.get("Transfer-Encoding") {
        Some(te) if !te.trim().eq_ignore_ascii_case("identity") => {
            Err(Error::UnsupportedTransferEncoding(te.to_string()))
        }
        _ => Ok(()),
    }
}

/// Read a request body from `source`.
///
/// At most `Content-Length` bytes are consumed from `source`; a length above
/// `options.max_body_bytes` is rejected before anything is read.
pub async fn read_body<R>(source: R, headers: &Headers, kind: BodyKind, options: &BodyOptions) -> Result<RequestBody, Error>
where
    R: AsyncRead + Unpin,
{
    check_transfer_encoding(headers)?;
    let length = content_length(headers)?.unwrap_or(0);
    if length > options.max_body_bytes {
        return Err(Error::BodyTooLarge(options.max_body_bytes));
    }

    let kind = kind.resolve(headers);
    // Fail on a bad boundary before consuming the body.
    let boundary = match kind {
        BodyKind::MultipartForm => Some(boundary_from_content_type(headers.get("Content-Type").unwrap_or_default())?),
        _ => None,
    };

    let mut source = source.take(length);
    match kind {
        BodyKind::File => {
            let (temp, mut file) = TempFile::create_in(&options.temp_dir, "body").await?;
            let received = tokio::io::copy(&mut source, &mut file).await?;
            if received < length {
                return Err(Error::IncompleteBody { expected: length, received });
            }
            file.flush().await?;
            let content_type = headers.get("Content-Type").map(str::to_string);
            Ok(RequestBody::File(FileBody::new(temp, received, content_type)))
        }
        BodyKind::MultipartForm => {
            let boundary = boundary.unwrap_or_default();
            let form = parse_multipart(&mut source, &boundary, length, options).await?;
            Ok(RequestBody::MultipartForm(form))
        }
        BodyKind::UrlEncodedForm => {
            let data = read_exact_len(&mut source, length).await?;
            let text = String::from_utf8(data).map_err(|_| Error::MalformedEncoding("form body is not UTF-8".to_string()))?;
            Ok(RequestBody::UrlEncodedForm(parse_urlencoded(&text)))
        }
        BodyKind::Data | BodyKind::Auto => Ok(RequestBody::Data(read_exact_len(&mut source, length).await?)),
    }
}

async fn read_exact_len<R: AsyncRead + Unpin>(source: &mut R, length: u64) -> Result<Vec<u8>, Error> {
    let mut data = Vec::with_capacity(length as usize);
    source.read_to_end(&mut data).await?;
    if (data.len() as u64) < length {
        return Err(Error::IncompleteBody {
            expected: length,
            received: data.len() as u64,
        });
    }
    Ok(data)
}
