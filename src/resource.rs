mod object_id;

use crate::k8s_types::K8sType;

use serde_json::Value;

pub use self::object_id::{ObjectId, ObjectIdRef};

pub type JsonObject = serde_json::Map<String, Value>;

pub static API_VERSION_POINTER: &str = "/apiVersion";
pub static KIND_POINTER: &str = "/kind";
pub static NAMESPACE_POINTER: &str = "/metadata/namespace";
pub static NAME_POINTER: &str = "/metadata/name";
pub static RESOURCE_VERSION_POINTER: &str = "/metadata/resourceVersion";

#[derive(Debug, PartialEq, Clone)]
pub struct InvalidResourceError {
    pub message: &'static str,
    pub value: Value,
}

impl InvalidResourceError {
    pub fn new(message: &'static str, value: Value) -> Self {
        InvalidResourceError { message, value }
    }
}

impl std::fmt::Display for InvalidResourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Invalid Resource: {}", self.message)
    }
}

impl std::error::Error for InvalidResourceError {}

/// A Kubernetes object held as its raw json. Kubesnap never needs a typed view of the objects it
/// copies around, only a handful of addressable fields: the name, the namespace, the
/// `resourceVersion`, and for services the cluster assigned ip addresses. Everything else is carried
/// through untouched.
///
/// The only structural guarantee is that the value is an object with a string `metadata.name`.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct K8sResource(Value);

impl K8sResource {
    pub fn from_value(value: Value) -> Result<K8sResource, InvalidResourceError> {
        if let Err(msg) = K8sResource::validate(&value) {
            Err(InvalidResourceError::new(msg, value))
        } else {
            Ok(K8sResource(value))
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<K8sResource, serde_json::Error> {
        let value: Value = serde_json::from_slice(bytes)?;
        K8sResource::from_value(value).map_err(|err| serde::de::Error::custom(err.message))
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn name(&self) -> &str {
        self.str_value(NAME_POINTER).unwrap_or("")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.str_value(NAMESPACE_POINTER).filter(|ns| !ns.is_empty())
    }

    /// Returns the `metadata.resourceVersion`, or an empty str if there isn't one
    pub fn resource_version(&self) -> &str {
        self.str_value(RESOURCE_VERSION_POINTER).unwrap_or("")
    }

    pub fn api_version(&self) -> Option<&str> {
        self.str_value(API_VERSION_POINTER)
    }

    pub fn kind(&self) -> Option<&str> {
        self.str_value(KIND_POINTER)
    }

    pub fn get_object_id(&self) -> ObjectIdRef {
        ObjectIdRef::new(self.namespace().unwrap_or(""), self.name())
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        if let Some(metadata) = self.metadata_mut() {
            metadata.insert("namespace".to_owned(), Value::String(namespace.to_owned()));
        }
    }

    pub fn clear_namespace(&mut self) {
        self.clear_field(NAMESPACE_POINTER);
    }

    pub fn clear_resource_version(&mut self) {
        self.clear_field(RESOURCE_VERSION_POINTER);
    }

    /// Removes the field at the given json pointer. Clearing a field that isn't present is a no-op.
    /// Only simple pointers are supported, meaning that segments may not contain escaped `/` or `~`.
    pub fn clear_field(&mut self, pointer: &str) {
        let split_idx = match pointer.rfind('/') {
            Some(idx) => idx,
            None => return,
        };
        let (parent, field) = (&pointer[..split_idx], &pointer[(split_idx + 1)..]);
        if let Some(obj) = self.0.pointer_mut(parent).and_then(Value::as_object_mut) {
            obj.remove(field);
        }
    }

    /// Fills in `apiVersion` and `kind` from the given type, but only where they are missing.
    /// Objects returned as items of a list response typically don't include either one.
    pub fn set_type_if_missing(&mut self, k8s_type: &K8sType) {
        if let Some(obj) = self.0.as_object_mut() {
            obj.entry("apiVersion")
                .or_insert_with(|| Value::String(k8s_type.api_version.to_owned()));
            obj.entry("kind")
                .or_insert_with(|| Value::String(k8s_type.kind.to_owned()));
        }
    }

    /// Serializes as json using two space indentation, which is the format of backup files
    pub fn to_pretty_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(&self.0)
    }

    pub fn str_value(&self, pointer: &str) -> Option<&str> {
        self.0.pointer(pointer).and_then(Value::as_str)
    }

    fn metadata_mut(&mut self) -> Option<&mut JsonObject> {
        self.0.pointer_mut("/metadata").and_then(Value::as_object_mut)
    }

    fn validate(value: &Value) -> Result<(), &'static str> {
        if !value.is_object() {
            return Err("resource must be a json object");
        }
        value
            .pointer("/metadata")
            .filter(|m| m.is_object())
            .ok_or("missing metadata")?;
        value
            .pointer(NAME_POINTER)
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or("missing metadata.name")?;
        Ok(())
    }
}

impl std::convert::AsRef<Value> for K8sResource {
    fn as_ref(&self) -> &Value {
        &self.0
    }
}

impl From<K8sResource> for Value {
    fn from(resource: K8sResource) -> Value {
        resource.into_value()
    }
}

impl std::fmt::Display for K8sResource {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
