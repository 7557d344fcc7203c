//! Download server: landing page at `/`, latest workbook everywhere else.
use hyper::body::Bytes;
use hyper::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use crate::workbook::ArtifactRegistry;

const CHUNK_SIZE: usize = 64 * 1024;
const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug)]
pub struct HttpState {
    pub landing_page: PathBuf,
    pub registry: Arc<ArtifactRegistry>,
}

/// Serve until the `shutdown` future resolves.
pub async fn serve_http<F>(addr: SocketAddr, state: Arc<HttpState>, shutdown: F) -> hyper::Result<()>
where
    F: std::future::Future<Output = ()>,
{
    let make_svc = make_service_fn(move |_conn| {
        let state = Arc::clone(&state);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| route(Arc::clone(&state), req)))
        }
    });
    let server = Server::try_bind(&addr)?.serve(make_svc);
    log::info!("download server listening on http://{addr}");
    server.with_graceful_shutdown(shutdown).await
}

pub async fn route(state: Arc<HttpState>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    log::debug!("{} {}", req.method(), req.uri().path());
    if req.uri().path() == "/" {
        return Ok(landing_page(&state.landing_page).await);
    }
    let Some(path) = state.registry.latest() else {
        return Ok(not_found("no workbook has been exported yet"));
    };
    Ok(download(&path).await)
}

async fn landing_page(path: &Path) -> Response<Body> {
    match tokio::fs::read(path).await {
        Ok(html) => Response::builder()
            .header(CONTENT_TYPE, "text/html; charset=utf-8")
            .body(Body::from(html))
            .unwrap_or_else(|_| internal_error()),
        Err(err) => {
            log::warn!("landing page {} unavailable: {err}", path.display());
            not_found("landing page not found")
        }
    }
}

async fn download(path: &Path) -> Response<Body> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(err) => {
            log::warn!("artifact {} unavailable: {err}", path.display());
            return not_found("workbook not found");
        }
    };
    let file_name = path
        .file_name()
        .map_or_else(|| "download.xlsx".into(), |n| n.to_string_lossy().into_owned());

    let (mut sender, body) = Body::channel();
    let shown = path.display().to_string();
    tokio::spawn(async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if sender.send_data(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        log::debug!("download of {shown} aborted by client");
                        break;
                    }
                }
                Err(err) => {
                    log::warn!("reading {shown} failed mid-download: {err}");
                    sender.abort();
                    break;
                }
            }
        }
    });

    Response::builder()
        .header(CONTENT_TYPE, XLSX_MIME)
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        )
        .body(body)
        .unwrap_or_else(|_| internal_error())
}

fn not_found(message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

fn internal_error() -> Response<Body> {
    let mut response = Response::new(Body::from("internal error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::tests::temp_dir;

    fn get(path: &str) -> Request<Body> {
        Request::get(path).body(Body::empty()).unwrap()
    }

    async fn body_bytes(response: Response<Body>) -> Vec<u8> {
        hyper::body::to_bytes(response.into_body())
            .await
            .unwrap()
            .to_vec()
    }

    fn state(dir: &Path) -> Arc<HttpState> {
        Arc::new(HttpState {
            landing_page: dir.join("index.html"),
            registry: Arc::new(ArtifactRegistry::new()),
        })
    }

    #[tokio::test]
    async fn root_serves_landing_page() {
        let dir = temp_dir("http-root");
        std::fs::write(dir.join("index.html"), "<h1>wheel</h1>").unwrap();
        let response = route(state(&dir), get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/html")
        );
        assert_eq!(body_bytes(response).await, b"<h1>wheel</h1>");
    }

    #[tokio::test]
    async fn missing_landing_page_is_404() {
        let dir = temp_dir("http-missing");
        let response = route(state(&dir), get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_paths_stream_latest_artifact() {
        let dir = temp_dir("http-download");
        let state = state(&dir);
        let response = route(Arc::clone(&state), get("/latest")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let artifact = dir.join("wheeltally-s1-20260101T000000.xlsx");
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&artifact, &payload).unwrap();
        state.registry.publish(artifact);

        let response = route(Arc::clone(&state), get("/anything/at/all")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_DISPOSITION],
            "attachment; filename=\"wheeltally-s1-20260101T000000.xlsx\""
        );
        assert_eq!(body_bytes(response).await, payload);
    }

    #[tokio::test]
    async fn vanished_artifact_is_404() {
        let dir = temp_dir("http-vanished");
        let state = state(&dir);
        state.registry.publish(dir.join("gone.xlsx"));
        let response = route(state, get("/latest")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
