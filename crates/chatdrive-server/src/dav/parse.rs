//! Header and path parsing for WebDAV requests.

use http::{HeaderMap, Uri};

use super::error::{DavError, DavResult};

/// PROPFIND depth. `infinity` is served as one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
}

/// A single byte range from a `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=a-b`
    Bounded(u64, u64),
    /// `bytes=a-`
    From(u64),
    /// `bytes=-n`
    Suffix(u64),
}

impl ByteRange {
    /// Inclusive `(start, end)` within a body of `size` bytes, or `None` if
    /// the range can't be satisfied.
    pub fn resolve(self, size: u64) -> Option<(u64, u64)> {
        if size == 0 {
            return None;
        }
        let last = size - 1;
        match self {
            ByteRange::Bounded(start, end) if start <= last => Some((start, end.min(last))),
            ByteRange::From(start) if start <= last => Some((start, last)),
            ByteRange::Suffix(n) if n > 0 => Some((size - n.min(size), last)),
            _ => None,
        }
    }
}

/// Parse `Range`. Malformed and multi-range headers yield `None`, and the
/// whole body is served.
pub fn parse_range(value: &str) -> Option<ByteRange> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.trim().split_once('-')?;
    match (start.trim(), end.trim()) {
        ("", "") => None,
        ("", n) => n.parse().ok().map(ByteRange::Suffix),
        (a, "") => a.parse().ok().map(ByteRange::From),
        (a, b) => {
            let a: u64 = a.parse().ok()?;
            let b: u64 = b.parse().ok()?;
            (a <= b).then_some(ByteRange::Bounded(a, b))
        }
    }
}

pub fn parse_depth(headers: &HeaderMap) -> DavResult<Depth> {
    let Some(value) = headers.get("depth") else {
        return Ok(Depth::One);
    };
    match value.to_str().map(str::trim) {
        Ok("0") => Ok(Depth::Zero),
        Ok("1") => Ok(Depth::One),
        Ok(v) if v.eq_ignore_ascii_case("infinity") => Ok(Depth::One),
        _ => Err(DavError::bad_request("invalid Depth header")),
    }
}

/// `Overwrite` header; absent means `T`.
pub fn parse_overwrite(headers: &HeaderMap) -> DavResult<bool> {
    let Some(value) = headers.get("overwrite") else {
        return Ok(true);
    };
    match value.to_str().map(str::trim) {
        Ok("T") | Ok("t") => Ok(true),
        Ok("F") | Ok("f") => Ok(false),
        _ => Err(DavError::bad_request("invalid Overwrite header")),
    }
}

/// `Destination` header as a decoded path. Accepts an absolute URL or a path.
pub fn parse_destination(headers: &HeaderMap) -> DavResult<String> {
    let value = headers
        .get("destination")
        .ok_or_else(|| DavError::bad_request("missing Destination header"))?
        .to_str()
        .map_err(|_| DavError::bad_request("non-ASCII Destination header"))?;
    let uri: Uri = value
        .trim()
        .parse()
        .map_err(|_| DavError::bad_request(format!("invalid Destination: {value}")))?;
    percent_decode(uri.path())
}

/// Declared body length, if the client sent one.
pub fn content_length(headers: &HeaderMap) -> DavResult<Option<u64>> {
    match headers.get(http::header::CONTENT_LENGTH) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .map(Some)
            .ok_or_else(|| DavError::bad_request("invalid Content-Length")),
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode `%XX` escapes. The result must be UTF-8.
pub fn percent_decode(input: &str) -> DavResult<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).copied().and_then(hex_value);
            let lo = bytes.get(i + 2).copied().and_then(hex_value);
            match (hi, lo) {
                (Some(hi), Some(lo)) => {
                    out.push((hi << 4) | lo);
                    i += 3;
                    continue;
                }
                _ => return Err(DavError::bad_request(format!("bad escape in {input}"))),
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).map_err(|_| DavError::bad_request("path is not UTF-8"))
}

/// Escape a path for use in an `href`. Slashes are kept.
pub fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for b in path.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
