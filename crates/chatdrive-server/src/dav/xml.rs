//! PROPFIND multistatus rendering.

use chrono::{DateTime, SecondsFormat, Utc};

use super::fs::DavEntry;
use super::parse::encode_path;

/// RFC 1123 date for `getlastmodified` and `Last-Modified`.
pub fn http_date(unix: i64) -> String {
    to_utc(unix).format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// RFC 3339 date for `creationdate`.
pub fn rfc3339(unix: i64) -> String {
    to_utc(unix).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn to_utc(unix: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(unix, 0).unwrap_or_default()
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Builds a `207 Multi-Status` body one response at a time.
#[derive(Debug)]
pub struct Multistatus {
    body: String,
}

impl Default for Multistatus {
    fn default() -> Self {
        Self::new()
    }
}

impl Multistatus {
    pub fn new() -> Self {
        Self {
            body: String::from(
                "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<D:multistatus xmlns:D=\"DAV:\">\n",
            ),
        }
    }

    /// Add one resource. `path` is the decoded absolute path.
    pub fn push(&mut self, path: &str, entry: &DavEntry) {
        let mut href = encode_path(path);
        if entry.is_dir && !href.ends_with('/') {
            href.push('/');
        }
        let body = &mut self.body;
        body.push_str("<D:response>\n");
        body.push_str(&format!("<D:href>{}</D:href>\n", escape(&href)));
        body.push_str("<D:propstat>\n<D:prop>\n");
        body.push_str(&format!(
            "<D:displayname>{}</D:displayname>\n",
            escape(&entry.name)
        ));
        if entry.is_dir {
            body.push_str("<D:resourcetype><D:collection/></D:resourcetype>\n");
        } else {
            body.push_str("<D:resourcetype/>\n");
            body.push_str(&format!(
                "<D:getcontentlength>{}</D:getcontentlength>\n",
                entry.size
            ));
            if let Some(mime) = &entry.mime_type {
                body.push_str(&format!(
                    "<D:getcontenttype>{}</D:getcontenttype>\n",
                    escape(mime)
                ));
            }
            if let Some(etag) = &entry.unique_ref {
                body.push_str(&format!("<D:getetag>\"{}\"</D:getetag>\n", escape(etag)));
            }
        }
        body.push_str(&format!(
            "<D:getlastmodified>{}</D:getlastmodified>\n",
            http_date(entry.modified)
        ));
        body.push_str(&format!(
            "<D:creationdate>{}</D:creationdate>\n",
            rfc3339(entry.created)
        ));
        body.push_str("</D:prop>\n<D:status>HTTP/1.1 200 OK</D:status>\n</D:propstat>\n");
        body.push_str("</D:response>\n");
    }

    pub fn finish(mut self) -> String {
        self.body.push_str("</D:multistatus>\n");
        self.body
    }
}
