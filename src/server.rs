//! The http api. Backups and restores make blocking calls, so they are run on tokio's blocking
//! thread pool. Requests are not coordinated with one another, so two restores into the same
//! namespace may run at the same time.
use crate::registry::DuplicateApplication;
use crate::service::{ServiceError, SnapshotService};

use hyper::server::Server;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use std::net::SocketAddr;
use std::sync::Arc;

/// Serves the api until the server fails
pub async fn start(port: u16, service: Arc<SnapshotService>) -> Result<(), hyper::Error> {
    let address: SocketAddr = ([0u8; 4], port).into();
    let serve_metrics = service.config().expose_metrics;
    log::info!("Starting server on address: {}, exposing '/metrics': {}", address, serve_metrics);

    let svc = Svc::new(service, serve_metrics);
    let make_service = make_service_fn(move |_| {
        let svc = svc.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |request| {
                let svc = svc.clone();
                async move { svc.handle_request(request).await }
            }))
        }
    });
    let result = Server::bind(&address).serve(make_service).await;
    if let Err(err) = result.as_ref() {
        log::error!("Server failed with error: {:?}", err);
    }
    result
}

type Error = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Deserialize)]
struct ApplicationRequest {
    name: String,
    namespace: String,
}

#[derive(Debug, Deserialize)]
struct BackupRequest {
    app_id: String,
}

#[derive(Debug, Deserialize)]
struct RestoreRequest {
    namespace: String,
    backup_id: String,
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(body)?;
    let resp = Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))?;
    Ok(resp)
}

fn error_response(err: &ServiceError) -> Result<Response<Body>, Error> {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    match err {
        ServiceError::DuplicateApplication(DuplicateApplication { existing_app_id }) => json_response(
            status,
            &json!({"error": err.to_string(), "existing_app_id": existing_app_id}),
        ),
        _ => json_response(status, &json!({"error": err.to_string()})),
    }
}

/// Returns the parsed body, or else the response to send back if it's not valid
async fn parse_body<T: DeserializeOwned>(request: Request<Body>) -> Result<Result<T, Response<Body>>, Error> {
    let bytes = hyper::body::to_bytes(request.into_body()).await?;
    match serde_json::from_slice(&bytes) {
        Ok(body) => Ok(Ok(body)),
        Err(err) => {
            log::debug!("Rejecting request with invalid body: {}", err);
            json_response(StatusCode::BAD_REQUEST, &json!({"error": err.to_string()})).map(Err)
        }
    }
}

#[derive(Debug, Clone)]
struct Svc {
    service: Arc<SnapshotService>,
    serve_metrics: bool,
}

impl Svc {
    fn new(service: Arc<SnapshotService>, serve_metrics: bool) -> Svc {
        Svc { service, serve_metrics }
    }

    fn not_found(&self) -> Result<Response<Body>, Error> {
        let resp = Response::builder().status(404).body(Body::empty())?;
        Ok(resp)
    }

    fn health(&self) -> Result<Response<Body>, Error> {
        let resp = Response::builder().status(200).body(Body::empty())?;
        Ok(resp)
    }

    fn metrics(&self) -> Result<Response<Body>, Error> {
        let body = self.service.metrics().encode_as_text()?;
        let resp = Response::builder()
            .status(200)
            .header(http::header::CONTENT_TYPE, prometheus::TEXT_FORMAT)
            .body(Body::from(body))?;
        Ok(resp)
    }

    async fn define_application(&self, request: Request<Body>) -> Result<Response<Body>, Error> {
        let body: ApplicationRequest = match parse_body(request).await? {
            Ok(body) => body,
            Err(resp) => return Ok(resp),
        };
        match self.service.define_application(&body.name, &body.namespace) {
            Ok(app) => json_response(StatusCode::OK, &json!({ "app_id": app.app_id })),
            Err(err) => error_response(&err),
        }
    }

    async fn backup(&self, request: Request<Body>) -> Result<Response<Body>, Error> {
        let body: BackupRequest = match parse_body(request).await? {
            Ok(body) => body,
            Err(resp) => return Ok(resp),
        };
        let service = self.service.clone();
        let result = tokio::task::spawn_blocking(move || service.backup(&body.app_id)).await?;
        match result {
            Ok((backup, _)) => json_response(StatusCode::OK, &backup),
            Err(err) => error_response(&err),
        }
    }

    async fn restore(&self, request: Request<Body>) -> Result<Response<Body>, Error> {
        let body: RestoreRequest = match parse_body(request).await? {
            Ok(body) => body,
            Err(resp) => return Ok(resp),
        };
        let service = self.service.clone();
        let result =
            tokio::task::spawn_blocking(move || service.restore(&body.backup_id, &body.namespace)).await?;
        match result {
            Ok(_) => json_response(
                StatusCode::OK,
                &json!({"message": "Restore completed successfully"}),
            ),
            Err(err) => error_response(&err),
        }
    }

    async fn handle_request(&self, request: Request<Body>) -> Result<Response<Body>, Error> {
        let req_method = request.method().clone();
        let req_uri = request.uri().clone();
        let req_path = req_uri.path().trim_end_matches('/');

        log::debug!("Got http request {} {}", req_method, req_uri);

        let result = match (&req_method, req_path) {
            (&Method::GET, "/health") => self.health(),
            (&Method::GET, "/metrics") if self.serve_metrics => self.metrics(),
            (&Method::PUT, "/application") => self.define_application(request).await,
            (&Method::POST, "/backup") => self.backup(request).await,
            (&Method::PUT, "/restore") => self.restore(request).await,
            _ => self.not_found(),
        };
        match result.as_ref() {
            Ok(resp) => {
                log::debug!(
                    "Finished handling {} {} with response status: {}",
                    req_method,
                    req_uri,
                    resp.status()
                );
            }
            Err(err) => {
                log::error!("Error handling {} {} , error: {:?}", req_method, req_uri, err);
            }
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cluster::ClusterApi;
    use crate::config::ServiceConfig;
    use crate::kind::ResourceKind;
    use crate::metrics::Metrics;
    use crate::testkit::{FakeCluster, MemoryStorage};
    use serde_json::Value;

    fn svc(cluster: Arc<FakeCluster>) -> Svc {
        let config = ServiceConfig::default().with_backup_root("/backups");
        let storage = Arc::new(MemoryStorage::new());
        let service = SnapshotService::new(config, Metrics::new(), cluster, storage);
        Svc::new(Arc::new(service), true)
    }

    fn request(method: Method, path: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(svc: &Svc, req: Request<Body>) -> (StatusCode, Value) {
        let resp = svc.handle_request(req).await.expect("request failed");
        let status = resp.status();
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    #[tokio::test]
    async fn define_backup_and_restore_an_application() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_namespace("demo");
        cluster.insert(ResourceKind::Pod, serde_json::json!({"metadata": {"name": "p1", "namespace": "prod"}}));
        let svc = svc(cluster.clone());

        let (status, body) = send(&svc, request(Method::PUT, "/application/", json!({"name": "shop", "namespace": "prod"}))).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(json!({"app_id": "app_1"}), body);

        let (status, body) = send(&svc, request(Method::POST, "/backup", json!({"app_id": "app_1"}))).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(json!({"backup_id": "backup_1", "app_id": "app_1"}), body);

        let (status, body) = send(&svc, request(Method::PUT, "/restore", json!({"namespace": "demo", "backup_id": "backup_1"}))).await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(json!({"message": "Restore completed successfully"}), body);
        assert!(cluster.get(ResourceKind::Pod, "demo", "p1").is_ok());
    }

    #[tokio::test]
    async fn duplicate_applications_are_bad_requests() {
        let svc = svc(Arc::new(FakeCluster::new()));
        let define = || request(Method::PUT, "/application", json!({"name": "shop", "namespace": "prod"}));
        send(&svc, define()).await;

        let (status, body) = send(&svc, define()).await;
        assert_eq!(StatusCode::BAD_REQUEST, status);
        assert_eq!(
            json!({"error": "Application with same name and namespace already exists", "existing_app_id": "app_1"}),
            body
        );
    }

    #[tokio::test]
    async fn client_mistakes_are_bad_requests() {
        let svc = svc(Arc::new(FakeCluster::new()));

        let (status, body) = send(&svc, request(Method::POST, "/backup", json!({"app_id": "app_7"}))).await;
        assert_eq!(StatusCode::BAD_REQUEST, status);
        assert_eq!(json!({"error": "Invalid app_id"}), body);

        let (status, body) = send(&svc, request(Method::PUT, "/restore", json!({"namespace": "nope", "backup_id": "backup_1"}))).await;
        assert_eq!(StatusCode::BAD_REQUEST, status);
        assert_eq!(json!({"error": "Namespace does not exist"}), body);

        let (status, _) = send(&svc, request(Method::PUT, "/restore", json!({"namespace": "demo"}))).await;
        assert_eq!(StatusCode::BAD_REQUEST, status);
    }

    #[tokio::test]
    async fn failed_backups_are_server_errors() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.fail_list(ResourceKind::ServiceAccount, crate::cluster::ClusterError::Rejected {
            status: 403,
            message: "forbidden".to_owned(),
        });
        let svc = svc(cluster);
        send(&svc, request(Method::PUT, "/application", json!({"name": "shop", "namespace": "prod"}))).await;

        let (status, body) = send(&svc, request(Method::POST, "/backup", json!({"app_id": "app_1"}))).await;
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, status);
        assert_eq!(
            json!({"error": "failed to export serviceaccount: list failed: rejected by api server with status 403: forbidden"}),
            body
        );
    }

    #[tokio::test]
    async fn health_metrics_and_unknown_routes() {
        let svc = svc(Arc::new(FakeCluster::new()));

        let (status, _) = send(&svc, request(Method::GET, "/health", Value::Null)).await;
        assert_eq!(StatusCode::OK, status);

        let (status, body) = send(&svc, request(Method::GET, "/metrics", Value::Null)).await;
        assert_eq!(StatusCode::OK, status);
        assert!(body.as_str().unwrap_or_default().contains("backups_started"), "body: {}", body);

        let (status, _) = send(&svc, request(Method::GET, "/backup", Value::Null)).await;
        assert_eq!(StatusCode::NOT_FOUND, status);
    }
}
