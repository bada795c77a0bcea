//! `multipart/form-data` bodies.
//!
//! Forms are parsed while the body arrives. Text fields are kept in memory;
//! file parts go straight to temporary files.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::files::TempFile;
use crate::parser::body::{BodyOptions, FileBody};
use crate::parser::error::Error;

const READ_CHUNK: usize = 16 * 1024;
const MAX_PART_HEAD_BYTES: usize = 16 * 1024;

/// The content of one part.
#[derive(Debug)]
pub enum PartData {
    /// A text field, held in memory.
    Bytes(Vec<u8>),
    /// A file part, streamed to a temporary file.
    File(FileBody),
}

impl PartData {
    pub fn len(&self) -> u64 {
        match self {
            PartData::Bytes(data) => data.len() as u64,
            PartData::File(file) => file.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The in-memory content, if this part was not streamed to disk.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PartData::Bytes(data) => Some(data),
            PartData::File(_) => None,
        }
    }
}

/// One part of a multipart form.
#[derive(Debug)]
pub struct Part {
    /// The form field name from `Content-Disposition`.
    pub name: String,
    /// The client-side filename, present for file parts.
    pub filename: Option<String>,
    /// The part's own `Content-Type`, if declared.
    pub content_type: Option<String>,
    /// Part content.
    pub data: PartData,
}

impl Part {
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }
}

/// A parsed multipart form.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub parts: Vec<Part>,
}

impl MultipartForm {
    /// The text value of the first non-file part named `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.parts
            .iter()
            .find(|p| p.name == name && !p.is_file())
            .and_then(|p| p.data.as_bytes())
            .and_then(|data| std::str::from_utf8(data).ok())
    }

    /// All parts carrying a filename.
    pub fn files(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter().filter(|p| p.is_file())
    }
}

/// Extract the `boundary` parameter from a `Content-Type` value.
pub fn boundary_from_content_type(content_type: &str) -> Result<String, Error> {
    let mut params = split_params(content_type).into_iter();
    let mime = params.next().unwrap_or_default();
    if !mime.trim().eq_ignore_ascii_case("multipart/form-data") {
        return Err(Error::MalformedMultipart(format!("not a multipart content type: {content_type}")));
    }
    params
        .filter_map(|p| param_value(&p, "boundary"))
        .find(|b| !b.is_empty())
        .ok_or_else(|| Error::MalformedMultipart("missing boundary".to_string()))
}

/// Parse a form of `length` bytes from `source`, split on `boundary`.
///
/// The whole body is consumed, epilogue included. File parts are written
/// under `options.temp_dir` and removed again if parsing fails.
pub async fn parse_multipart<R>(source: R, boundary: &str, length: u64, options: &BodyOptions) -> Result<MultipartForm, Error>
where
    R: AsyncRead + Unpin,
{
    let delimiter = format!("--{boundary}").into_bytes();
    let next_delimiter = format!("\r\n--{boundary}").into_bytes();
    let mut reader = PartReader {
        source,
        buf: Vec::with_capacity(READ_CHUNK),
        received: 0,
        expected: length,
    };

    // Skip the preamble.
    loop {
        if let Some(i) = find(&reader.buf, &delimiter, 0) {
            reader.buf.drain(..i + delimiter.len());
            break;
        }
        let keep = (delimiter.len() - 1).min(reader.buf.len());
        reader.buf.drain(..reader.buf.len() - keep);
        reader.fill("opening boundary not found").await?;
    }

    let mut form = MultipartForm::default();
    loop {
        while reader.buf.len() < 2 {
            reader.fill("boundary not followed by CRLF").await?;
        }
        if reader.buf.starts_with(b"--") {
            reader.finish().await?;
            return Ok(form);
        }
        if !reader.buf.starts_with(b"\r\n") {
            return Err(Error::MalformedMultipart("boundary not followed by CRLF".to_string()));
        }
        reader.buf.drain(..2);

        let head = reader.read_part_head().await?;
        let (name, filename, content_type) = parse_part_head(&head)?;
        let data = if filename.is_some() {
            let (temp, mut file) = TempFile::create_in(&options.temp_dir, "part").await?;
            let len = reader.copy_part(&next_delimiter, &mut file).await?;
            file.flush().await?;
            PartData::File(FileBody::new(temp, len, content_type.clone()))
        } else {
            let mut data = Vec::new();
            reader.copy_part(&next_delimiter, &mut data).await?;
            PartData::Bytes(data)
        };
        form.parts.push(Part {
            name,
            filename,
            content_type,
            data,
        });
    }
}

/// Buffered access to a multipart body of known length.
struct PartReader<R> {
    source: R,
    buf: Vec<u8>,
    received: u64,
    expected: u64,
}

impl<R: AsyncRead + Unpin> PartReader<R> {
    /// Append more of the body to the buffer. Running out of body is an
    /// error described by `missing`.
    async fn fill(&mut self, missing: &str) -> Result<(), Error> {
        self.buf.reserve(READ_CHUNK);
        let n = self.source.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(self.truncated(missing));
        }
        self.received += n as u64;
        Ok(())
    }

    fn truncated(&self, missing: &str) -> Error {
        if self.received < self.expected {
            Error::IncompleteBody {
                expected: self.expected,
                received: self.received,
            }
        } else {
            Error::MalformedMultipart(missing.to_string())
        }
    }

    /// Take the header block of a part, up to and including its blank line.
    async fn read_part_head(&mut self) -> Result<Vec<u8>, Error> {
        loop {
            if self.buf.starts_with(b"\r\n") {
                self.buf.drain(..2);
                return Ok(Vec::new());
            }
            if let Some(end) = find(&self.buf, b"\r\n\r\n", 0) {
                let head = self.buf[..end].to_vec();
                self.buf.drain(..end + 4);
                return Ok(head);
            }
            if self.buf.len() > MAX_PART_HEAD_BYTES {
                return Err(Error::MalformedMultipart("part headers too large".to_string()));
            }
            self.fill("part headers not terminated").await?;
        }
    }

    /// Write part content to `sink` up to the next `delimiter`, which is
    /// consumed. Returns the number of bytes written.
    async fn copy_part<W>(&mut self, delimiter: &[u8], sink: &mut W) -> Result<u64, Error>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        loop {
            if let Some(end) = find(&self.buf, delimiter, 0) {
                sink.write_all(&self.buf[..end]).await?;
                self.buf.drain(..end + delimiter.len());
                return Ok(written + end as u64);
            }
            // The tail could be the start of a delimiter split across reads.
            let safe = self.buf.len().saturating_sub(delimiter.len() - 1);
            if safe > 0 {
                sink.write_all(&self.buf[..safe]).await?;
                self.buf.drain(..safe);
                written += safe as u64;
            }
            self.fill("part lacks a terminating boundary").await?;
        }
    }

    /// Discard the epilogue.
    async fn finish(&mut self) -> Result<(), Error> {
        self.received += tokio::io::copy(&mut self.source, &mut tokio::io::sink()).await?;
        if self.received < self.expected {
            return Err(self.truncated("body ended early"));
        }
        Ok(())
    }
}

fn parse_part_head(head: &[u8]) -> Result<(String, Option<String>, Option<String>), Error> {
    let head = std::str::from_utf8(head)
        .map_err(|_| Error::MalformedMultipart("part headers are not UTF-8".to_string()))?;

    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in head.split("\r\n").filter(|l| !l.is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| Error::MalformedMultipart(format!("invalid part header: {line}")))?;
        let key = key.trim();
        if key.eq_ignore_ascii_case("Content-Disposition") {
            for param in split_params(value).iter().skip(1) {
                if let Some(v) = param_value(param, "name") {
                    name = Some(v);
                } else if let Some(v) = param_value(param, "filename") {
                    filename = Some(v);
                }
            }
        } else if key.eq_ignore_ascii_case("Content-Type") {
            content_type = Some(value.trim().to_string());
        }
    }

    let name = name.ok_or_else(|| Error::MalformedMultipart("part without a name".to_string()))?;
    Ok((name, filename, content_type))
}

/// Split a header value on `;`, ignoring separators inside quotes.
fn split_params(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    for c in value.chars() {
        match c {
            _ if escaped => {
                current.push(c);
                escaped = false;
            }
            '\\' if quoted => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                quoted = !quoted;
            }
            ';' if !quoted => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    out.push(current);
    out
}

/// If `param` is `key=value` (value optionally quoted), return the unquoted value.
fn param_value(param: &str, key: &str) -> Option<String> {
    let (k, v) = param.split_once('=')?;
    if !k.trim().eq_ignore_ascii_case(key) {
        return None;
    }
    let v = v.trim();
    if let Some(inner) = v.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner.replace("\\\"", "\"").replace("\\\\", "\\"))
    } else {
        Some(v.to_string())
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    const BODY: &[u8] = b"preamble\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\
\r\n\
My book\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"a;b.txt\"\r\n\
Content-Type: text/plain\r\n\
\r\n\
line one\r\nline two\r\n\
--XyZ--\r\n";

    fn options(name: &str) -> BodyOptions {
        BodyOptions {
            temp_dir: std::env::temp_dir().join(format!("localserve-multipart-{name}-{}", std::process::id())),
            ..BodyOptions::default()
        }
    }

    async fn parse(body: &[u8], boundary: &str, options: &BodyOptions) -> Result<MultipartForm, Error> {
        parse_multipart(body, boundary, body.len() as u64, options).await
    }

    fn temp_files(options: &BodyOptions) -> usize {
        std::fs::read_dir(&options.temp_dir).map(|dir| dir.count()).unwrap_or(0)
    }

    /// Yields its data a few bytes at a time.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl AsyncRead for Trickle<'_> {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            let this = self.get_mut();
            let data = this.data;
            let n = this.step.min(data.len()).min(buf.remaining());
            buf.put_slice(&data[..n]);
            this.data = &data[n..];
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(boundary_from_content_type("multipart/form-data; boundary=XyZ").unwrap(), "XyZ");
        assert_eq!(
            boundary_from_content_type("Multipart/Form-Data; charset=utf-8; boundary=\"a b\"").unwrap(),
            "a b"
        );
        assert!(matches!(
            boundary_from_content_type("multipart/form-data"),
            Err(Error::MalformedMultipart(_))
        ));
        assert!(matches!(
            boundary_from_content_type("text/plain; boundary=x"),
            Err(Error::MalformedMultipart(_))
        ));
    }

    #[tokio::test]
    async fn test_parse_multipart() {
        let opts = options("parse");
        let form = parse(BODY, "XyZ", &opts).await.unwrap();
        assert_eq!(form.parts.len(), 2);
        assert_eq!(form.field("title"), Some("My book"));

        let files: Vec<&Part> = form.files().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "file");
        assert_eq!(files[0].filename.as_deref(), Some("a;b.txt"));
        assert_eq!(files[0].content_type.as_deref(), Some("text/plain"));
        let PartData::File(file) = &files[0].data else {
            panic!("file part kept in memory");
        };
        assert_eq!(file.len(), 18);
        assert_eq!(std::fs::read(file.path()).unwrap(), b"line one\r\nline two");
    }

    #[tokio::test]
    async fn test_file_parts_are_removed_with_the_form() {
        let opts = options("dropped");
        let form = parse(BODY, "XyZ", &opts).await.unwrap();
        let path: PathBuf = match &form.parts[1].data {
            PartData::File(file) => file.path().to_path_buf(),
            PartData::Bytes(_) => panic!("file part kept in memory"),
        };
        assert!(path.starts_with(&opts.temp_dir));
        drop(form);
        assert!(!path.exists());
        assert_eq!(temp_files(&opts), 0);
    }

    #[tokio::test]
    async fn test_delimiter_split_across_reads() {
        let opts = options("trickle");
        for step in [1, 3, 7] {
            let source = Trickle { data: BODY, step };
            let form = parse_multipart(source, "XyZ", BODY.len() as u64, &opts).await.unwrap();
            assert_eq!(form.field("title"), Some("My book"));
            let PartData::File(file) = &form.parts[1].data else {
                panic!("file part kept in memory");
            };
            assert_eq!(std::fs::read(file.path()).unwrap(), b"line one\r\nline two");
        }
    }

    #[tokio::test]
    async fn test_missing_terminating_boundary() {
        let body = b"--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nvalue";
        let result = parse(body, "XyZ", &options("unterminated")).await;
        assert!(matches!(result, Err(Error::MalformedMultipart(_))));
    }

    #[tokio::test]
    async fn test_truncated_body_removes_partial_file() {
        let opts = options("truncated");
        let cut = BODY.len() - 20;
        let result = parse_multipart(&BODY[..cut], "XyZ", BODY.len() as u64, &opts).await;
        assert!(matches!(result, Err(Error::IncompleteBody { received, .. }) if received == cut as u64));
        assert_eq!(temp_files(&opts), 0);
    }

    #[tokio::test]
    async fn test_missing_opening_boundary() {
        let result = parse(b"no boundary here", "XyZ", &options("opening")).await;
        assert!(matches!(result, Err(Error::MalformedMultipart(_))));
    }

    #[tokio::test]
    async fn test_part_without_name() {
        let body = b"--XyZ\r\nContent-Type: text/plain\r\n\r\nvalue\r\n--XyZ--\r\n";
        let result = parse(body, "XyZ", &options("unnamed")).await;
        assert!(matches!(result, Err(Error::MalformedMultipart(_))));
    }

    #[tokio::test]
    async fn test_empty_form() {
        let form = parse(b"--XyZ--\r\n", "XyZ", &options("empty")).await.unwrap();
        assert!(form.parts.is_empty());
    }

    #[tokio::test]
    async fn test_epilogue_is_consumed() {
        let body = b"--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--XyZ--\r\ntrailing epilogue";
        let mut source: &[u8] = body;
        let form = parse_multipart(&mut source, "XyZ", body.len() as u64, &options("epilogue")).await.unwrap();
        assert_eq!(form.field("a"), Some("1"));
        assert!(source.is_empty());
    }
}
