//! The view of a live cluster that the engine needs. `ClusterApi` is intentionally synchronous:
//! each backup or restore runs on a single thread and every call blocks until it completes.
//! `KubeCluster` implements it on top of the async `Client` by blocking on a tokio runtime handle,
//! so it must only be used from threads that are not themselves driving async tasks (for example
//! from within `tokio::task::spawn_blocking`).
use crate::client::{Client, Error as ClientError};
use crate::k8s_types::{self, K8sType};
use crate::kind::ResourceKind;
use crate::resource::{K8sResource, ObjectIdRef};

use tokio::runtime::Handle;

use std::fmt::{self, Display};

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterError {
    NotFound,
    AlreadyExists,
    /// The api server rejected the request, for example because the object is invalid
    Rejected { status: u16, message: String },
    /// The request could not be completed, or the response could not be understood
    Transport(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        *self == ClusterError::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        *self == ClusterError::AlreadyExists
    }
}

impl Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ClusterError::NotFound => f.write_str("not found"),
            ClusterError::AlreadyExists => f.write_str("already exists"),
            ClusterError::Rejected { status, ref message } => {
                write!(f, "rejected by api server with status {}: {}", status, message)
            }
            ClusterError::Transport(ref msg) => write!(f, "request failed: {}", msg),
        }
    }
}

impl std::error::Error for ClusterError {}

impl From<ClientError> for ClusterError {
    fn from(err: ClientError) -> ClusterError {
        match err.status() {
            Some(status) if status.as_u16() == 404 => ClusterError::NotFound,
            Some(status) if status.as_u16() == 409 => ClusterError::AlreadyExists,
            Some(status) => ClusterError::Rejected {
                status: status.as_u16(),
                message: err
                    .api_message()
                    .map(str::to_owned)
                    .unwrap_or_else(|| status.to_string()),
            },
            None => ClusterError::Transport(err.to_string()),
        }
    }
}

pub trait ClusterApi: Send + Sync {
    /// Lists every object of the kind in the namespace
    fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<K8sResource>, ClusterError>;

    /// Returns `ClusterError::NotFound` if there is no such object
    fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<K8sResource, ClusterError>;

    /// Returns `ClusterError::AlreadyExists` if an object with the same name is already present
    fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        resource: &K8sResource,
    ) -> Result<K8sResource, ClusterError>;

    fn namespace_exists(&self, namespace: &str) -> Result<bool, ClusterError>;
}

/// A `ClusterApi` backed by a real api server
#[derive(Debug, Clone)]
pub struct KubeCluster {
    client: Client,
    runtime: Handle,
}

impl KubeCluster {
    pub fn new(client: Client, runtime: Handle) -> KubeCluster {
        KubeCluster { client, runtime }
    }
}

fn to_resource(value: serde_json::Value) -> Result<K8sResource, ClusterError> {
    K8sResource::from_value(value).map_err(|err| ClusterError::Transport(err.to_string()))
}

fn list_item_to_resource(k8s_type: &K8sType, value: serde_json::Value) -> Result<K8sResource, ClusterError> {
    let mut resource = to_resource(value)?;
    resource.set_type_if_missing(k8s_type);
    Ok(resource)
}

impl ClusterApi for KubeCluster {
    fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Vec<K8sResource>, ClusterError> {
        let list = self
            .runtime
            .block_on(self.client.list_all(kind.k8s_type(), Some(namespace)))?;
        list.items
            .into_iter()
            .map(|item| list_item_to_resource(kind.k8s_type(), item))
            .collect()
    }

    fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<K8sResource, ClusterError> {
        let id = ObjectIdRef::new(namespace, name);
        let found = self
            .runtime
            .block_on(self.client.get_resource(kind.k8s_type(), &id))?;
        found.ok_or(ClusterError::NotFound).and_then(to_resource)
    }

    fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        resource: &K8sResource,
    ) -> Result<K8sResource, ClusterError> {
        let created = self.runtime.block_on(self.client.create_resource(
            kind.k8s_type(),
            Some(namespace),
            resource.as_ref(),
        ))?;
        to_resource(created)
    }

    fn namespace_exists(&self, namespace: &str) -> Result<bool, ClusterError> {
        let id = ObjectIdRef::new("", namespace);
        let found = self
            .runtime
            .block_on(self.client.get_resource(k8s_types::core::v1::Namespace, &id))?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::ApiError;
    use http::StatusCode;

    fn api_error(code: u16, message: &str) -> ApiError {
        ApiError {
            status: "Failure".to_owned(),
            message: message.to_owned(),
            reason: String::new(),
            code,
        }
    }

    #[test]
    fn client_errors_are_classified_by_status() {
        let not_found: ClusterError = ClientError::http(StatusCode::NOT_FOUND, None).into();
        assert!(not_found.is_not_found());

        let conflict: ClusterError =
            ClientError::http(StatusCode::CONFLICT, Some(api_error(409, "exists"))).into();
        assert!(conflict.is_already_exists());

        let invalid: ClusterError = ClientError::http(
            StatusCode::UNPROCESSABLE_ENTITY,
            Some(api_error(422, "spec.containers: Required value")),
        )
        .into();
        assert_eq!(
            ClusterError::Rejected {
                status: 422,
                message: "spec.containers: Required value".to_owned()
            },
            invalid
        );

        let no_body: ClusterError = ClientError::http(StatusCode::FORBIDDEN, None).into();
        assert_eq!(
            ClusterError::Rejected {
                status: 403,
                message: "403 Forbidden".to_owned()
            },
            no_body
        );
    }

    #[test]
    fn list_items_are_given_the_type_they_were_listed_as() {
        let item = serde_json::json!({"metadata": {"name": "p1", "namespace": "prod"}});
        let resource = list_item_to_resource(ResourceKind::Pod.k8s_type(), item).unwrap();
        assert_eq!(Some("v1"), resource.api_version());
        assert_eq!(Some("Pod"), resource.kind());

        let item = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
        });
        let resource = list_item_to_resource(ResourceKind::Pod.k8s_type(), item).unwrap();
        assert_eq!(Some("apps/v1"), resource.api_version());
        assert_eq!(Some("Deployment"), resource.kind());
    }

    #[test]
    fn non_http_errors_are_transport_errors() {
        let err: ClusterError = ClientError::InvalidUrl("nope".to_owned()).into();
        match err {
            ClusterError::Transport(msg) => assert!(msg.contains("nope")),
            other => panic!("expected transport error, got: {:?}", other),
        }
    }
}
