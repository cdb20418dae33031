mod request;

use crate::config::{CAData, ClientConfig, Credentials};
use crate::k8s_types::K8sType;
use crate::metrics::ClientMetrics;
use crate::resource::ObjectIdRef;

use bytes::Buf;
use http::{Request, Response, StatusCode};
use hyper::client::Client as HyperClient;
use hyper::client::HttpConnector;
use hyper::Body;
use hyper_openssl::HttpsConnector;
use openssl::pkey::PKey;
use openssl::ssl::{SslConnector, SslMethod};
use openssl::x509::X509;
use serde::de::DeserializeOwned;
use serde_json::Value;

use std::io;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
pub enum Error {
    Io(hyper::Error),
    Serde(serde_json::Error),
    Request(http::Error),
    InvalidUrl(String),
    Http(StatusCode, Option<ApiError>),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e as &(dyn std::error::Error + 'static)),
            Error::Serde(e) => Some(e as &(dyn std::error::Error + 'static)),
            Error::Request(e) => Some(e as &(dyn std::error::Error + 'static)),
            Error::Http(_, Some(e)) => Some(e as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl Error {
    pub fn http(status: StatusCode, api_error: Option<ApiError>) -> Error {
        Error::Http(status, api_error)
    }

    pub fn is_http_status(&self, code: u16) -> bool {
        match self {
            Error::Http(ref status, _) => status.as_u16() == code,
            _ => false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Http(status, _) => Some(*status),
            _ => None,
        }
    }

    /// The message from the api server's `Status` response body, if there was one
    pub fn api_message(&self) -> Option<&str> {
        match self {
            Error::Http(_, Some(api_error)) => Some(api_error.message.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Error::Io(ref e) => write!(f, "Io Error: {}", e),
            Error::Serde(ref e) => write!(f, "(De)Serialization error: {}", e),
            Error::Request(ref e) => write!(f, "Invalid request: {}", e),
            Error::InvalidUrl(ref e) => write!(f, "Invalid api server url: {}", e),
            Error::Http(ref status, Some(ref e)) => write!(f, "Http Error: {}: {}", status, e.message),
            Error::Http(ref status, None) => write!(f, "Http Error: {}", status),
        }
    }
}

impl From<hyper::Error> for Error {
    fn from(e: hyper::Error) -> Error {
        Error::Io(e)
    }
}
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Serde(e)
    }
}
impl From<http::Error> for Error {
    fn from(e: http::Error) -> Error {
        Error::Request(e)
    }
}

#[derive(Debug)]
struct ClientInner {
    http_client: HyperClient<HttpsConnector<HttpConnector>>,
    config: ClientConfig,
    metrics: ClientMetrics,
}

/// An async client for the parts of the Kubernetes api that kubesnap uses. Cloning is cheap,
/// and all clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct Client(Arc<ClientInner>);

impl Client {
    pub fn new(mut config: ClientConfig, metrics: ClientMetrics) -> Result<Client, io::Error> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let mut ssl = SslConnector::builder(SslMethod::tls())?;
        // enable http2 using alpn
        ssl.set_alpn_protos(b"\x02h2\x08http/1.1")?;
        match config.ca_data.take() {
            Some(CAData::Contents(certs)) => {
                let decoded = decode_base64(&certs, "certificate-authority-data")?;
                let certs = X509::stack_from_pem(decoded.as_slice())?;
                let cert_store = ssl.cert_store_mut();
                for cert in certs {
                    cert_store.add_cert(cert)?;
                }
            }
            Some(CAData::File(path)) => {
                ssl.set_ca_file(path.as_str())?;
            }
            None => {}
        }

        let client_cert = match config.credentials {
            Credentials::PemPath {
                ref certificate_path,
                ref private_key_path,
            } => Some((std::fs::read(certificate_path)?, std::fs::read(private_key_path)?)),
            Credentials::Pem {
                ref certificate_base64,
                ref private_key_base64,
            } => Some((
                decode_base64(certificate_base64, "client-certificate-data")?,
                decode_base64(private_key_base64, "client-key-data")?,
            )),
            Credentials::Header(_) => None,
        };
        if let Some((cert_pem, key_pem)) = client_cert {
            let cert = X509::from_pem(cert_pem.as_slice())?;
            let pkey = PKey::private_key_from_pem(key_pem.as_slice())?;
            ssl.set_certificate(&*cert)?;
            ssl.set_private_key(&*pkey)?;
            // ensures that the provided private key and certificate actually go together
            ssl.check_private_key()?;
        }

        if config.verify_ssl_certs {
            ssl.set_verify(openssl::ssl::SslVerifyMode::PEER);
        } else {
            log::warn!("TLS Certificate verifification has been disabled! All connections to the Kubernetes api server will be insecure!");
            ssl.set_verify(openssl::ssl::SslVerifyMode::NONE);
        }

        let https = HttpsConnector::with_connector(http, ssl)?;
        let client = HyperClient::builder().build(https);

        let inner = ClientInner {
            http_client: client,
            config,
            metrics,
        };
        Ok(Client(Arc::new(inner)))
    }

    /// Lists all the resources of the given type. The items are returned exactly as the api server
    /// sent them, which usually means without `apiVersion` or `kind`.
    pub async fn list_all(
        &self,
        k8s_type: &K8sType,
        namespace: Option<&str>,
    ) -> Result<ObjectList<Value>, Error> {
        let req = request::list_request(&self.0.config, k8s_type, namespace)?;
        self.get_response_body(req).await
    }

    /// gets the requested resource by name and converts a 404 response into a None value
    pub async fn get_resource(
        &self,
        k8s_type: &K8sType,
        id: &ObjectIdRef<'_>,
    ) -> Result<Option<Value>, Error> {
        let req = request::get_request(&self.0.config, k8s_type, id)?;
        match self.get_response_body::<Value>(req).await {
            Ok(body) => Ok(Some(body)),
            Err(ref e) if e.is_http_status(404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Creates the resource in the given namespace and returns the object as the api server
    /// persisted it
    pub async fn create_resource(
        &self,
        k8s_type: &K8sType,
        namespace: Option<&str>,
        resource: &Value,
    ) -> Result<Value, Error> {
        log::info!(
            "Creating resource '{}' with type: {}",
            resource.pointer("/metadata/name").and_then(Value::as_str).unwrap_or(""),
            k8s_type
        );
        let req = request::create_request(&self.0.config, k8s_type, namespace, resource)?;
        self.get_response_body(req).await
    }

    async fn get_response_body<T: DeserializeOwned>(&self, req: Request<Body>) -> Result<T, Error> {
        let method = req.method().to_string();
        let uri = req.uri().to_string();
        let start_time = Instant::now();

        let response = self
            .execute_request(start_time, method.as_str(), uri.as_str(), req)
            .await?;

        let status_code = response.status().as_u16();
        let result = Client::read_body(response).await;
        log::debug!(
            "Finished {} request to: {}, status: {}, total_duration: {}ms, success: {}",
            method,
            uri,
            status_code,
            start_time.elapsed().as_millis(),
            result.is_ok()
        );
        result
    }

    async fn execute_request(
        &self,
        start_time: Instant,
        method: &str,
        uri: &str,
        req: Request<Body>,
    ) -> Result<Response<Body>, Error> {
        log::debug!("Starting {} request to: {}", method, uri);
        let timer = self.0.metrics.request_started();
        let result = self.0.http_client.request(req).await;
        timer.observe_duration();
        match result {
            Ok(resp) => {
                log::debug!(
                    "Response status received for {} to: {}, status: {}, duration: {}ms",
                    method,
                    uri,
                    resp.status().as_u16(),
                    start_time.elapsed().as_millis()
                );
                Ok(resp)
            }
            Err(err) => {
                log::error!(
                    "Failed to execute {} request to: {}, err: {}",
                    method,
                    uri,
                    err
                );
                Err(err.into())
            }
        }
    }

    async fn read_body<T: DeserializeOwned>(response: Response<Body>) -> Result<T, Error> {
        let status = response.status();
        if !status.is_success() {
            let body = hyper::body::to_bytes(response.into_body()).await?;
            let api_error = serde_json::from_slice::<ApiError>(body.as_ref()).ok();
            if api_error.is_none() {
                log::debug!(
                    "Response status: {}, body: {}",
                    status,
                    String::from_utf8_lossy(body.as_ref())
                );
            }
            return Err(Error::http(status, api_error));
        }

        let deserialized = if log::log_enabled!(log::Level::Trace) {
            // a response body can't be read twice, so buffer the whole thing in order to log it
            let body = hyper::body::to_bytes(response.into_body()).await?;
            log::trace!("Got response body: {}", String::from_utf8_lossy(body.as_ref()));
            serde_json::from_slice(body.as_ref())?
        } else {
            let body = hyper::body::aggregate(response.into_body()).await?;
            serde_json::from_reader(body.reader())?
        };
        Ok(deserialized)
    }
}

fn decode_base64(value: &str, field: &str) -> Result<Vec<u8>, io::Error> {
    base64::decode(value).map_err(|err| {
        io::Error::new(
            io::ErrorKind::Other,
            format!("Invalid base64 content of {}: {}", field, err),
        )
    })
}

/// The `Status` object that the api server returns in the body of most error responses
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
pub struct ApiError {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: String,
    pub code: u16,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Api Error: status: '{}', code: {}, reason: '{}', message: '{}'",
            self.status, self.code, self.reason, self.message
        )
    }
}
impl std::error::Error for ApiError {}

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct ListMeta {
    #[serde(rename = "resourceVersion")]
    pub resource_version: Option<String>,
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct ObjectList<T> {
    pub metadata: ListMeta,
    pub items: Vec<T>,
}
