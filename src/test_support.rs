//! Local HTTP fixtures for tests.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// One request as the fixture received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }
}

pub type RequestLog = Arc<Mutex<Vec<RecordedRequest>>>;

pub fn request_log() -> RequestLog {
    Arc::new(Mutex::new(Vec::new()))
}

#[derive(Clone)]
pub struct Route {
    path: &'static str,
    method: Option<Method>,
    query: Option<String>,
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
    hits: Option<Arc<AtomicUsize>>,
}

impl Route {
    pub fn ok(path: &'static str, content_type: &'static str, body: Vec<u8>) -> Self {
        Route {
            path,
            method: None,
            query: None,
            status: 200,
            content_type,
            body,
            hits: None,
        }
    }

    pub fn ok_counting(
        path: &'static str,
        content_type: &'static str,
        body: Vec<u8>,
        hits: Arc<AtomicUsize>,
    ) -> Self {
        Route {
            hits: Some(hits),
            ..Route::ok(path, content_type, body)
        }
    }

    pub fn status(path: &'static str, status: u16) -> Self {
        Route {
            status,
            ..Route::ok(path, "text/plain", b"error".to_vec())
        }
    }

    pub fn status_counting(path: &'static str, status: u16, hits: Arc<AtomicUsize>) -> Self {
        Route {
            hits: Some(hits),
            ..Route::status(path, status)
        }
    }

    pub fn json(path: &'static str, body: serde_json::Value) -> Self {
        Route::ok(path, "application/json", body.to_string().into_bytes())
    }

    /// Only answers requests with this method.
    pub fn on(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Only answers requests whose raw query string equals `query`.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    fn matches(&self, method: &Method, uri: &Uri) -> bool {
        self.path == uri.path()
            && self.method.as_ref().map_or(true, |m| m == method)
            && self.query.as_deref().map_or(true, |q| Some(q) == uri.query())
    }
}

struct Fixture {
    routes: Vec<Route>,
    log: RequestLog,
}

async fn respond(
    State(fixture): State<Arc<Fixture>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    fixture
        .log
        .lock()
        .expect("request log")
        .push(RecordedRequest {
            method: method.clone(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers,
            body: body.to_vec(),
        });

    let Some(route) = fixture.routes.iter().find(|r| r.matches(&method, &uri)) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Some(hits) = &route.hits {
        hits.fetch_add(1, Ordering::SeqCst);
    }
    let status = StatusCode::from_u16(route.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, route.content_type)], route.body.clone()).into_response()
}

/// Binds an ephemeral localhost port. Returns the listener and its base URL,
/// so response bodies can point back at the fixture before it is served.
pub async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    (listener, format!("http://{}", addr))
}

/// Serves `routes` on `listener`; every request lands in `log`. The first
/// matching route answers, anything unmatched gets a 404.
pub fn serve_on(listener: TcpListener, routes: Vec<Route>, log: RequestLog) {
    let router = Router::new()
        .fallback(respond)
        .with_state(Arc::new(Fixture { routes, log }));
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
}

/// Serves `routes` on an ephemeral localhost port and returns the base URL.
pub async fn serve(routes: Vec<Route>) -> String {
    let (listener, base) = bind().await;
    serve_on(listener, routes, request_log());
    base
}
