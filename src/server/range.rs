//! Single byte ranges (`Range: bytes=...`).

/// A requested byte range, before it is checked against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=first-last`, both inclusive.
    FromTo(u64, u64),
    /// `bytes=first-`
    From(u64),
    /// `bytes=-n`: the last `n` bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Parse a `Range` header value.
    ///
    /// Returns `None` for anything this server does not honour (other units,
    /// multiple ranges, syntax errors); the whole resource is served instead.
    pub fn parse(header: &str) -> Option<ByteRange> {
        let spec = header.trim().strip_prefix("bytes=")?.trim();
        if spec.contains(',') {
            return None;
        }
        let (first, last) = spec.split_once('-')?;
        let (first, last) = (first.trim(), last.trim());
        match (first.is_empty(), last.is_empty()) {
            (true, false) => last.parse().ok().map(ByteRange::Suffix),
            (false, true) => first.parse().ok().map(ByteRange::From),
            (false, false) => {
                let (first, last) = (first.parse().ok()?, last.parse().ok()?);
                (first <= last).then_some(ByteRange::FromTo(first, last))
            }
            (true, true) => None,
        }
    }

    /// Resolve against a resource of `len` bytes.
    ///
    /// # Returns
    ///
    /// The inclusive `(first, last)` offsets to send, or `None` when the range
    /// cannot be satisfied.
    pub fn resolve(&self, len: u64) -> Option<(u64, u64)> {
        if len == 0 {
            return None;
        }
        match *self {
            ByteRange::FromTo(first, last) if first < len => Some((first, last.min(len - 1))),
            ByteRange::From(first) if first < len => Some((first, len - 1)),
            ByteRange::Suffix(n) if n > 0 => Some((len.saturating_sub(n), len - 1)),
            _ => None,
        }
    }
}
