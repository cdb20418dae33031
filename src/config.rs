//! Configuration for kubesnap. `ClientConfig` describes how to talk to the Kubernetes api server,
//! and `ServiceConfig` covers everything else about running the backup service.
mod kubeconfig;

pub use self::kubeconfig::{KubeConfig, KubeConfigError};

use std::io;
use std::path::{Path, PathBuf};

const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_ACCOUNT_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const API_SERVER_HOSTNAME: &str = "kubernetes.default.svc";

pub const DEFAULT_BACKUP_ROOT: &str = "./backups";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_USER_AGENT: &str = "kubesnap";

pub const BACKUP_ROOT_ENV: &str = "KUBESNAP_BACKUP_ROOT";
pub const SERVER_PORT_ENV: &str = "KUBESNAP_PORT";

/// Settings for the backup service itself
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Each backup is written to its own directory underneath this one
    pub backup_root: PathBuf,
    pub server_port: u16,
    pub expose_metrics: bool,
    pub user_agent: String,
}

impl Default for ServiceConfig {
    fn default() -> ServiceConfig {
        ServiceConfig {
            backup_root: PathBuf::from(DEFAULT_BACKUP_ROOT),
            server_port: DEFAULT_SERVER_PORT,
            expose_metrics: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl ServiceConfig {
    /// Starts from the defaults, and then applies any overrides from the `KUBESNAP_BACKUP_ROOT`
    /// and `KUBESNAP_PORT` environment variables. Returns an error if the port is not a valid number.
    pub fn from_env() -> Result<ServiceConfig, io::Error> {
        let mut config = ServiceConfig::default();
        if let Ok(root) = std::env::var(BACKUP_ROOT_ENV) {
            config = config.with_backup_root(root);
        }
        if let Ok(port) = std::env::var(SERVER_PORT_ENV) {
            let port = port.trim().parse::<u16>().map_err(|err| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("Invalid value for {}: '{}': {}", SERVER_PORT_ENV, port, err),
                )
            })?;
            config = config.with_port(port);
        }
        Ok(config)
    }

    pub fn with_backup_root(mut self, backup_root: impl Into<PathBuf>) -> Self {
        self.backup_root = backup_root.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    pub fn expose_metrics(mut self, expose_metrics: bool) -> Self {
        self.expose_metrics = expose_metrics;
        self
    }

    pub fn backup_dir(&self, backup_id: &str) -> PathBuf {
        self.backup_root.join(backup_id)
    }
}

/// Where to find the certificate authority for the api server
#[derive(Debug, Clone, PartialEq)]
pub enum CAData {
    /// Path to a pem file
    File(String),
    /// Base64 encoded pem contents, as they appear inline in a kubeconfig file
    Contents(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Credentials {
    /// The complete value of the `Authorization` header
    Header(String),
    /// Paths to a client certificate and private key, both pem encoded
    PemPath {
        certificate_path: String,
        private_key_path: String,
    },
    /// Base64 encoded client certificate and private key
    Pem {
        certificate_base64: String,
        private_key_base64: String,
    },
}

impl Credentials {
    pub fn base64_bearer_token(token: impl AsRef<str>) -> Credentials {
        Credentials::Header(format!("Bearer {}", token.as_ref().trim()))
    }

    pub fn basic(username: &str, password: &str) -> Credentials {
        let encoded = base64::encode(format!("{}:{}", username, password));
        Credentials::Header(format!("Basic {}", encoded))
    }

    pub fn header_value(&self) -> Option<&str> {
        match self {
            Credentials::Header(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_server_endpoint: String,
    pub credentials: Credentials,
    pub ca_data: Option<CAData>,
    pub user_agent: String,
    pub impersonate: Option<String>,
    pub impersonate_groups: Vec<String>,
    pub verify_ssl_certs: bool,
}

impl ClientConfig {
    /// Builds a config from the service account token and CA that Kubernetes mounts into every pod
    pub fn from_service_account(user_agent: impl Into<String>) -> Result<ClientConfig, io::Error> {
        let token = std::fs::read_to_string(SERVICE_ACCOUNT_TOKEN_PATH)?;

        let ca_data = if Path::new(SERVICE_ACCOUNT_CA_PATH).exists() {
            Some(CAData::File(SERVICE_ACCOUNT_CA_PATH.to_owned()))
        } else {
            None
        };

        Ok(ClientConfig {
            api_server_endpoint: format!("https://{}", API_SERVER_HOSTNAME),
            credentials: Credentials::base64_bearer_token(token),
            ca_data,
            user_agent: user_agent.into(),
            impersonate: None,
            impersonate_groups: Vec::new(),
            verify_ssl_certs: true,
        })
    }

    /// Loads the kubeconfig file from `KUBECONFIG` or `~/.kube/config` and uses its current context
    pub fn from_kubeconfig(user_agent: impl Into<String>) -> Result<ClientConfig, KubeConfigError> {
        kubeconfig::load_from_kubeconfig(user_agent.into())
    }

    /// Tries the service account first, since that's what's available when running in a cluster,
    /// and falls back to the kubeconfig file.
    pub fn discover(user_agent: &str) -> Result<ClientConfig, KubeConfigError> {
        ClientConfig::from_service_account(user_agent).or_else(|err| {
            log::debug!(
                "Failed to load ClientConfig from service account ({}), so trying to load from kubeconfig",
                err
            );
            ClientConfig::from_kubeconfig(user_agent)
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn service_config_builder_overrides_defaults() {
        let subject = ServiceConfig::default()
            .with_backup_root("/var/lib/kubesnap")
            .with_port(9999)
            .expose_metrics(false);
        assert_eq!(PathBuf::from("/var/lib/kubesnap/backup_3"), subject.backup_dir("backup_3"));
        assert_eq!(9999, subject.server_port);
        assert!(!subject.expose_metrics);
    }

    #[test]
    fn default_backup_dir_is_relative_to_the_working_directory() {
        let subject = ServiceConfig::default();
        assert_eq!(Path::new("./backups/backup_1"), subject.backup_dir("backup_1").as_path());
    }

    #[test]
    fn basic_credentials_are_base64_encoded() {
        let creds = Credentials::basic("admin", "secret");
        assert_eq!(Some("Basic YWRtaW46c2VjcmV0"), creds.header_value());

        let token = Credentials::base64_bearer_token("abc123\n");
        assert_eq!(Some("Bearer abc123"), token.header_value());
    }
}
