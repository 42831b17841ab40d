//! Request handlers: one per WebDAV method.

use std::io::{self, SeekFrom};
use std::time::Duration;

use bytes::Bytes;
use chatdrive_store::OwnerId;
use chatdrive_transfer::TransferError;
use futures::TryStreamExt;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Body, Frame};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use super::DavMethod;
use super::error::{DavError, DavResult};
use super::fs::{DavEntry, DavFs, split_path};
use super::parse::{
    Depth, content_length, parse_depth, parse_destination, parse_overwrite, parse_range,
    percent_decode,
};
use super::xml::{Multistatus, http_date};
use crate::auth::authenticate;
use crate::constants::ALLOWED_METHODS;

/// Response body: buffered for metadata, streamed for content.
pub type DavBody = UnsyncBoxBody<Bytes, io::Error>;

fn empty() -> DavBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

fn full(data: impl Into<Bytes>) -> DavBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed_unsync()
}

fn respond(status: StatusCode, body: DavBody) -> Response<DavBody> {
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp
}

fn set_header(resp: &mut Response<DavBody>, name: HeaderName, value: impl AsRef<str>) {
    if let Ok(value) = HeaderValue::from_str(value.as_ref()) {
        resp.headers_mut().insert(name, value);
    }
}

/// Turns HTTP requests into filesystem calls for an authenticated owner.
#[derive(Debug, Clone)]
pub struct DavHandler {
    fs: DavFs,
    realm: String,
    rejection_delay: Duration,
}

impl DavHandler {
    pub fn new(fs: DavFs, realm: impl Into<String>, rejection_delay: Duration) -> Self {
        Self {
            fs,
            realm: realm.into(),
            rejection_delay,
        }
    }

    pub fn fs(&self) -> &DavFs {
        &self.fs
    }

    /// Handle one request. Never fails: errors become status codes.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<DavBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: std::fmt::Display,
    {
        let span = info_span!("dav", method = %req.method(), path = %req.uri().path());
        self.dispatch(req).instrument(span).await
    }

    async fn dispatch<B>(&self, req: Request<B>) -> Response<DavBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: std::fmt::Display,
    {
        let Ok(method) = req.method().as_str().parse::<DavMethod>() else {
            let mut resp = respond(StatusCode::METHOD_NOT_ALLOWED, empty());
            set_header(&mut resp, header::ALLOW, ALLOWED_METHODS);
            return resp;
        };
        match self.route(method, req).await {
            Ok(resp) => {
                info!(status = resp.status().as_u16(), "handled");
                resp
            }
            Err(err) => self.error_response(method, err).await,
        }
    }

    async fn route<B>(&self, method: DavMethod, req: Request<B>) -> DavResult<Response<DavBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: std::fmt::Display,
    {
        let owner = authenticate(self.fs.tree(), req.headers())?;
        let path = percent_decode(req.uri().path())?;
        match method {
            DavMethod::Options => Ok(options()),
            DavMethod::Propfind => self.propfind(owner, &path, req.headers()),
            DavMethod::Get => self.get(owner, &path, req.headers(), false),
            DavMethod::Head => self.get(owner, &path, req.headers(), true),
            DavMethod::Put => self.put(owner, &path, req).await,
            DavMethod::Mkcol => {
                self.fs.mkcol(owner, &path)?;
                Ok(respond(StatusCode::CREATED, empty()))
            }
            DavMethod::Delete => {
                self.fs.remove(owner, &path)?;
                Ok(respond(StatusCode::NO_CONTENT, empty()))
            }
            DavMethod::Move => {
                let destination = parse_destination(req.headers())?;
                let overwrite = parse_overwrite(req.headers())?;
                let replaced = self.fs.rename(owner, &path, &destination, overwrite)?;
                let status = if replaced {
                    StatusCode::NO_CONTENT
                } else {
                    StatusCode::CREATED
                };
                Ok(respond(status, empty()))
            }
        }
    }

    fn propfind(&self, owner: OwnerId, path: &str, headers: &HeaderMap) -> DavResult<Response<DavBody>> {
        let depth = parse_depth(headers)?;
        let entry = self.fs.stat(owner, path)?;
        let canonical = split_path(path).display();

        let mut ms = Multistatus::new();
        ms.push(&canonical, &entry);
        if entry.is_dir && depth == Depth::One {
            for child in self.fs.read_dir(owner, path)? {
                let child_path = if canonical == "/" {
                    format!("/{}", child.name)
                } else {
                    format!("{canonical}/{}", child.name)
                };
                ms.push(&child_path, &child);
            }
        }

        let mut resp = respond(StatusCode::MULTI_STATUS, full(ms.finish()));
        set_header(&mut resp, header::CONTENT_TYPE, "application/xml; charset=utf-8");
        Ok(resp)
    }

    fn get(
        &self,
        owner: OwnerId,
        path: &str,
        headers: &HeaderMap,
        head_only: bool,
    ) -> DavResult<Response<DavBody>> {
        let entry = self.fs.stat(owner, path)?;
        if entry.is_dir {
            if head_only {
                let mut resp = respond(StatusCode::OK, empty());
                set_last_modified(&mut resp, &entry);
                return Ok(resp);
            }
            return Err(DavError::MethodNotAllowed(format!("GET on collection {path}")));
        }

        let (entry, mut download) = self.fs.open_read(owner, path)?;
        let size = entry.size;
        let range = headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range);
        let (status, start, len) = match range {
            None => (StatusCode::OK, 0, size),
            Some(range) => match range.resolve(size) {
                Some((start, end)) => (StatusCode::PARTIAL_CONTENT, start, end - start + 1),
                None => return Err(DavError::RangeNotSatisfiable { size }),
            },
        };

        let body = if head_only || len == 0 {
            empty()
        } else {
            download
                .seek(SeekFrom::Start(start))
                .map_err(TransferError::from)?;
            StreamBody::new(download.into_stream(len).map_ok(Frame::data)).boxed_unsync()
        };

        let mut resp = respond(status, body);
        set_header(&mut resp, header::ACCEPT_RANGES, "bytes");
        set_header(&mut resp, header::CONTENT_LENGTH, len.to_string());
        if let Some(mime) = &entry.mime_type {
            set_header(&mut resp, header::CONTENT_TYPE, mime);
        }
        if let Some(etag) = &entry.unique_ref {
            set_header(&mut resp, header::ETAG, format!("\"{etag}\""));
        }
        set_last_modified(&mut resp, &entry);
        if status == StatusCode::PARTIAL_CONTENT {
            let end = start + len - 1;
            set_header(
                &mut resp,
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{size}"),
            );
        }
        Ok(resp)
    }

    async fn put<B>(&self, owner: OwnerId, path: &str, req: Request<B>) -> DavResult<Response<DavBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: std::fmt::Display,
    {
        let declared = content_length(req.headers())?;
        // Cancelled when this future is dropped, i.e. the client went away.
        let cancel = CancellationToken::new();
        let _request_alive = cancel.clone().drop_guard();

        let (mut upload, created) = self.fs.open_write(owner, path, declared, cancel)?;
        let mut body = std::pin::pin!(req.into_body());
        while let Some(frame) = body.frame().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    let reason = format!("request body failed: {e}");
                    upload.abort(&reason);
                    return Err(TransferError::aborted(reason).into());
                }
            };
            if let Ok(data) = frame.into_data() {
                if !data.is_empty() {
                    upload.write(data).await?;
                }
            }
        }
        let file = upload.finish().await?;

        let status = if created {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        };
        let mut resp = respond(status, empty());
        set_header(&mut resp, header::ETAG, format!("\"{}\"", file.unique_ref));
        Ok(resp)
    }

    async fn error_response(&self, method: DavMethod, err: DavError) -> Response<DavBody> {
        let status = err.status(method);
        if status.is_server_error() {
            warn!(status = status.as_u16(), "request failed: {}", err);
        } else {
            info!(status = status.as_u16(), "request rejected: {}", err);
        }

        let mut resp = respond(status, full(format!("{err}\n")));
        set_header(&mut resp, header::CONTENT_TYPE, "text/plain; charset=utf-8");
        match err {
            DavError::Unauthorized => {
                if !self.rejection_delay.is_zero() {
                    tokio::time::sleep(self.rejection_delay).await;
                }
                set_header(
                    &mut resp,
                    header::WWW_AUTHENTICATE,
                    format!("Basic realm=\"{}\"", self.realm),
                );
            }
            DavError::RangeNotSatisfiable { size } => {
                set_header(&mut resp, header::CONTENT_RANGE, format!("bytes */{size}"));
            }
            DavError::MethodNotAllowed(_) => {
                set_header(&mut resp, header::ALLOW, ALLOWED_METHODS);
            }
            _ => {}
        }
        resp
    }
}

fn options() -> Response<DavBody> {
    let mut resp = respond(StatusCode::OK, empty());
    set_header(&mut resp, HeaderName::from_static("dav"), "1");
    set_header(&mut resp, header::ALLOW, ALLOWED_METHODS);
    set_header(&mut resp, HeaderName::from_static("ms-author-via"), "DAV");
    resp
}

fn set_last_modified(resp: &mut Response<DavBody>, entry: &DavEntry) {
    set_header(resp, header::LAST_MODIFIED, http_date(entry.modified));
}
