//! Defines the HTTP surface.
//!
//! ## Structure
//! - `POST /upload`  : multipart `keyword` + `file`, stores the file
//! - `POST /download`: form field `word`, streams the matching file
//! - `GET  /healthz`, `GET /readyz`: probes
//! - everything else : static assets from the public directory
//!
//! Every request passes through request tracing and panic recovery.

use crate::errors::AppError;
use crate::handlers::{
    AppState,
    blob_handlers::{download, upload},
    health_handlers::{healthz, readyz},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::any::Any;
use tower_http::{catch_panic::CatchPanicLayer, services::ServeDir, trace::TraceLayer};

/// Room for multipart boundaries and the non-file fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the router. The upload body limit sits a little above the
/// repository's size limit so oversized files reach the repository check.
pub fn routes(upload_limit: usize, public_dir: &str) -> Router<AppState> {
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(
                upload_limit.saturating_add(MULTIPART_OVERHEAD),
            )),
        )
        .route("/download", post(download))
        .fallback_service(ServeDir::new(public_dir));
    with_middleware(router)
}

/// Wrap a router in panic recovery and request tracing.
pub fn with_middleware<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(CatchPanicLayer::custom(catch_panic))
        .layer(TraceLayer::new_for_http())
}

fn catch_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic type");
    tracing::error!(message = %message, "handler panicked");

    AppError::internal("Internal server error").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        blob_repository::KeyedBlobRepository, remote_store::RemoteObjectStore,
        token_service::ServerSecret,
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use object_store::memory::InMemory;
    use std::{sync::Arc, time::Duration};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    const BOUNDARY: &str = "keydrop-test-boundary";

    fn app(size_limit: usize) -> Router {
        let store = RemoteObjectStore::new(InMemory::new(), "memory", "uploads", 1000);
        let repository =
            KeyedBlobRepository::new(Arc::new(store), ServerSecret::new("s3cr3t").unwrap())
                .with_size_limit(size_limit);
        let state = AppState {
            repository,
            request_timeout: Duration::from_secs(5),
            shutdown: CancellationToken::new(),
        };
        routes(size_limit, "public").with_state(state)
    }

    fn multipart(keyword: Option<&str>, file: Option<(&str, &str, &[u8])>) -> Request<Body> {
        let mut body = Vec::new();
        if let Some(keyword) = keyword {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"keyword\"\r\n\r\n{keyword}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((name, content_type, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::post("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn download_request(form: &str) -> Request<Body> {
        Request::post("/download")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap()
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn upload_then_download_round_trip() {
        let app = app(1024);

        let response = app
            .clone()
            .oneshot(multipart(
                Some("golden-retriever"),
                Some(("dog.txt", "text/plain", b"woof".as_slice())),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_string(response).await;
        assert!(html.contains("dog.txt"));
        assert!(html.contains("memory://uploads/dog.txt"));
        assert!(!html.contains("golden-retriever"));

        let response = app
            .oneshot(download_request("word=golden-retriever"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"dog.txt\""
        );
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(body_string(response).await, "woof");
    }

    #[tokio::test]
    async fn punctuated_filename_downloads_under_its_own_name() {
        let app = app(1024);
        let response = app
            .clone()
            .oneshot(multipart(
                Some("q3"),
                Some(("report#1.pdf", "application/pdf", b"%PDF".as_slice())),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("memory://uploads/report#1.pdf"));

        let response = app.oneshot(download_request("word=q3")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"report#1.pdf\""
        );
        assert_eq!(body_string(response).await, "%PDF");
    }

    #[tokio::test]
    async fn download_with_wrong_case_is_not_found() {
        let app = app(1024);
        app.clone()
            .oneshot(multipart(
                Some("golden-retriever"),
                Some(("dog.txt", "text/plain", b"woof".as_slice())),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(download_request("word=Golden-Retriever"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_without_file_is_bad_request() {
        let response = app(1024)
            .oneshot(multipart(Some("k"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_without_keyword_is_bad_request() {
        let response = app(1024)
            .oneshot(multipart(None, Some(("a.txt", "text/plain", b"x".as_slice()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_size_limit_boundary() {
        let app = app(4);

        let response = app
            .clone()
            .oneshot(multipart(Some("k"), Some(("ok.bin", "application/octet-stream", b"1234".as_slice()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(multipart(Some("k"), Some(("big.bin", "application/octet-stream", b"12345".as_slice()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_without_word_is_bad_request() {
        let response = app(1024).oneshot(download_request("")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn handler_panic_becomes_internal_error() {
        async fn explode() -> &'static str {
            panic!("handler exploded")
        }
        let app = with_middleware(Router::new().route("/explode", get(explode)));

        let response = app
            .oneshot(Request::get("/explode").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(response).await;
        assert!(body.contains("Internal server error"));
        assert!(!body.contains("handler exploded"));
    }

    #[tokio::test]
    async fn probes_report_ok() {
        let app = app(1024);
        let response = app
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("\"store\""));
    }
}
