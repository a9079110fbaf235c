//! # HTTP Seam
//!
//! The server-side handler trait, prefix routing, and the small set of
//! request/response helpers the handlers share.

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use http::HeaderValue;
use http::Request;
use http::Response;
use http::StatusCode;
use http::Uri;
use http::header;
use tunpack::Marshaller;
use tunrpc::ContentType;
use tunrpc::RemoteException;

/// Serves one exchange. Every request gets exactly one response; failures are
/// expressed as statuses, never as errors.
#[async_trait::async_trait]
pub trait HttpHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request<Bytes>) -> Response<Bytes>;
}

#[async_trait::async_trait]
impl<H: HttpHandler + ?Sized> HttpHandler for Arc<H> {
    async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        (**self).handle(request).await
    }
}

/// A response with a status and no body.
pub fn status(code: StatusCode) -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = code;
    response
}

/// A response carrying a marshalled body of the given content type.
pub fn marshalled(code: StatusCode, content_type: &ContentType, body: Vec<u8>) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from(body));
    *response.status_mut() = code;
    if let Ok(value) = HeaderValue::from_str(&content_type.to_string()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

/// Marshals `exception` as the whole body. Falls back to a bare status when
/// the exception itself cannot be marshalled.
pub fn exception(code: StatusCode, mut out: Box<dyn Marshaller>, exception: &RemoteException) -> Response<Bytes> {
    let body = exception
        .write_to(out.as_mut())
        .and_then(|_| out.finish().map_err(tunrpc::Error::from));
    match body {
        Ok(body) => marshalled(code, &tunrpc::constants::EXCEPTION, body),
        Err(e) => {
            tracing::warn!(error = %e, class = %exception.class, "failed to marshal exception");
            status(code)
        }
    }
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Looks `name` up across every `Cookie` header.
pub fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim_matches('"'))
}

/// Dispatches on path prefix and hands the handler the remainder of the path.
///
/// The longest matching prefix wins. A prefix only matches whole segments.
#[derive(Default, Clone)]
pub struct PathRouter {
    routes: Vec<(String, Arc<dyn HttpHandler>)>,
}

impl PathRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, prefix: impl Into<String>, handler: impl HttpHandler) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        self.routes.push((prefix, Arc::new(handler)));
        self.routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }

    fn find(&self, path: &str) -> Option<(&Arc<dyn HttpHandler>, String)> {
        self.routes.iter().find_map(|(prefix, handler)| {
            let rest = path.strip_prefix(prefix.as_str())?;
            if rest.is_empty() || rest.starts_with('/') {
                Some((handler, rest.to_string()))
            } else {
                None
            }
        })
    }
}

#[async_trait::async_trait]
impl HttpHandler for PathRouter {
    async fn handle(&self, mut request: Request<Bytes>) -> Response<Bytes> {
        let Some((handler, rest)) = self.find(request.uri().path()) else {
            tracing::debug!(path = %request.uri().path(), "no route");
            return status(StatusCode::NOT_FOUND);
        };

        let relative = match request.uri().query() {
            Some(query) => format!("{}?{}", rest, query),
            None => rest,
        };
        let relative = if relative.starts_with('/') { relative } else { format!("/{}", relative) };
        match relative.parse::<Uri>() {
            Ok(uri) => *request.uri_mut() = uri,
            Err(_) => return status(StatusCode::BAD_REQUEST),
        }
        handler.handle(request).await
    }
}
