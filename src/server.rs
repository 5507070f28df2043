//! HTTP query façade.
//!
//! Maps requests onto `RefreshCoordinator` reads:
//!
//! - `GET /data`      snapshot bytes, refresh metadata in `X-Last-*` headers
//! - `GET /status`    refresh status as JSON
//! - `GET /site-info` station registry
//! - `GET /health`    liveness
//!
//! `/data` may run a cold-start refresh, which is blocking I/O, so it is
//! moved onto tokio's blocking pool.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;

use crate::logging::{self, DataSource};
use crate::model::{CyclePhase, RefreshStatus, ServiceError};
use crate::refresh::RefreshCoordinator;
use crate::stations::Station;

pub const LAST_REFRESH_HEADER: &str = "x-last-refresh";
pub const LAST_ERROR_HEADER: &str = "x-last-error";

/// Shared state handed to every connection.
pub struct ServerContext {
    pub coordinator: Arc<RefreshCoordinator>,
    pub stations: Vec<Station>,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    #[serde(flatten)]
    status: &'a RefreshStatus,
    stale: bool,
    phase: CyclePhase,
}

#[derive(Serialize)]
struct SiteInfoBody<'a> {
    sites: &'a [Station],
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

/// Accept connections until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, ctx: Arc<ServerContext>, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()>,
{
    if let Ok(addr) = listener.local_addr() {
        logging::info(DataSource::Http, None, &format!("listening on http://{}", addr));
    }
    tokio::pin!(shutdown);

    loop {
        let (stream, _) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = &mut shutdown => {
                logging::info(DataSource::Http, None, "shutdown requested, no longer accepting");
                return Ok(());
            }
        };
        let io = TokioIo::new(stream);
        let ctx = ctx.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let ctx = ctx.clone();
                async move { handle_request(req, &ctx).await }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                logging::debug(DataSource::Http, None, &format!("connection error: {}", e));
            }
        });
    }
}

async fn handle_request<B>(
    req: Request<B>,
    ctx: &Arc<ServerContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET {
        return Ok(text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"));
    }

    let path = req.uri().path().to_string();
    let response = match path.as_str() {
        "/data" => data(ctx).await,
        "/status" => status(ctx),
        "/site-info" => json(StatusCode::OK, &SiteInfoBody { sites: &ctx.stations }),
        "/health" | "/healthz" => text(StatusCode::OK, "OK"),
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

async fn data(ctx: &Arc<ServerContext>) -> Response<Full<Bytes>> {
    let coordinator = ctx.coordinator.clone();
    let result = tokio::task::spawn_blocking(move || coordinator.get_snapshot())
        .await
        .unwrap_or_else(|e| Err(ServiceError::NotAvailable(format!("refresh task failed: {}", e))));

    match result {
        Ok((bytes, status)) => {
            let mut response = body(StatusCode::OK, "application/json", Bytes::from(bytes));
            insert_refresh_headers(&mut response, &status);
            response
        }
        Err(err) => {
            logging::warn(DataSource::Http, None, &format!("/data unavailable: {}", err));
            let mut response = json(
                StatusCode::SERVICE_UNAVAILABLE,
                &ErrorBody { error: "Data not available", message: err.to_string() },
            );
            insert_refresh_headers(&mut response, &ctx.coordinator.status());
            response
                .headers_mut()
                .insert(hyper::header::RETRY_AFTER, HeaderValue::from_static("60"));
            response
        }
    }
}

fn status(ctx: &Arc<ServerContext>) -> Response<Full<Bytes>> {
    let status = ctx.coordinator.status();
    json(
        StatusCode::OK,
        &StatusBody {
            status: &status,
            stale: status.is_stale(),
            phase: ctx.coordinator.phase(),
        },
    )
}

/// Adds `X-Last-Refresh` / `X-Last-Error` when the status has them.
pub fn insert_refresh_headers(response: &mut Response<Full<Bytes>>, status: &RefreshStatus) {
    let headers = response.headers_mut();
    let stamps = [
        (LAST_REFRESH_HEADER, status.last_success),
        (LAST_ERROR_HEADER, status.last_error.as_ref().map(|e| e.at)),
    ];
    for (name, stamp) in stamps {
        let Some(stamp) = stamp else { continue };
        if let Ok(value) = HeaderValue::from_str(&stamp.to_rfc3339()) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
}

fn body(status: StatusCode, content_type: &'static str, bytes: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn text(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    body(status, "text/plain", Bytes::from_static(message.as_bytes()))
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(bytes) => body(status, "application/json", Bytes::from(bytes)),
        Err(e) => {
            logging::error(DataSource::Http, None, &format!("failed to encode response: {}", e));
            text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}
