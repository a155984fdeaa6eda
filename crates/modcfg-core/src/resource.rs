// ── Resource instances ──
//
// A hydrated, typed record living in a cache store. Instances hold a weak
// link back to their store so `save()` can write through it without
// keeping the store alive.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CoreError;
use crate::registry::{ResourceDescriptor, STALE_FIELD, TYPE_TAG_FIELD};
use crate::store::{CacheStore, StoreInner};

/// Bound for domain payloads a cache store can hold.
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// One typed record plus its cache bookkeeping.
#[derive(Clone)]
pub struct Resource<T: Payload> {
    pub(crate) entry_key: String,
    pub(crate) primary_key: String,
    pub(crate) payload: T,
    pub(crate) stale: bool,
    pub(crate) descriptor: Arc<ResourceDescriptor>,
    pub(crate) store: Weak<StoreInner<T>>,
}

impl<T: Payload> Resource<T> {
    /// Primary key read from the payload on hydration.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Key of the cache entry this instance belongs to.
    pub fn entry_key(&self) -> &str {
        &self.entry_key
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Mutable payload; changes are sent by the next [`save`](Self::save).
    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    /// True once a change event for this record arrived after it was read.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn resource_type(&self) -> &str {
        self.descriptor.resource_type()
    }

    pub fn descriptor(&self) -> &Arc<ResourceDescriptor> {
        &self.descriptor
    }

    /// In-memory JSON view: the payload plus the type tag and staleness flag.
    pub fn to_json(&self) -> Result<Value, CoreError> {
        let mut value = self.encode()?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                TYPE_TAG_FIELD.to_owned(),
                Value::String(self.descriptor.type_tag().to_owned()),
            );
            object.insert(STALE_FIELD.to_owned(), Value::Bool(self.stale));
        }
        Ok(value)
    }

    /// Body sent on update: the payload with every transient field removed.
    pub fn wire_body(&self) -> Result<Value, CoreError> {
        let mut value = self.encode()?;
        if let Some(object) = value.as_object_mut() {
            for field in self.descriptor.transient_fields() {
                object.remove(field);
            }
        }
        Ok(value)
    }

    /// Persist this instance through its cache store's `update` verb.
    ///
    /// On success the store holds the saved instance as Ready and it is
    /// returned. On failure the cache is untouched.
    pub async fn save(&self) -> Result<Arc<Resource<T>>, CoreError> {
        let inner = self.store.upgrade().ok_or(CoreError::Detached)?;
        CacheStore::from_inner(inner).save(self).await
    }

    pub(crate) fn with_stale(&self, stale: bool) -> Self {
        let mut copy = self.clone();
        copy.stale = stale;
        copy
    }

    fn encode(&self) -> Result<Value, CoreError> {
        serde_json::to_value(&self.payload).map_err(|e| CoreError::Decode {
            resource_type: self.descriptor.resource_type().to_owned(),
            message: format!("cannot encode payload: {e}"),
        })
    }
}

impl<T: Payload + fmt::Debug> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("resource_type", &self.descriptor.resource_type())
            .field("entry_key", &self.entry_key)
            .field("primary_key", &self.primary_key)
            .field("stale", &self.stale)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Primary key of an optional instance.
pub fn primary_key<T: Payload>(resource: Option<&Resource<T>>) -> Option<&str> {
    resource.map(Resource::primary_key)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::registry::{VerbSpec, verbs};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        metadata: Value,
        #[serde(flatten)]
        extra: serde_json::Map<String, Value>,
    }

    fn widget(stale: bool) -> Resource<Widget> {
        let descriptor = ResourceDescriptor::builder("widget", "widgets/{key}")
            .verb(verbs::GET, VerbSpec::new(modcfg_api::HttpMethod::Get))
            .build()
            .unwrap();
        let payload: Widget = serde_json::from_value(json!({
            "metadata": { "uid": "w-1" },
            "color": "blue",
            "resourceType": "leftover",
        }))
        .unwrap();
        Resource {
            entry_key: "w-1".into(),
            primary_key: "w-1".into(),
            payload,
            stale,
            descriptor: Arc::new(descriptor),
            store: Weak::new(),
        }
    }

    #[test]
    fn json_view_carries_tag_and_staleness() {
        let view = widget(true).to_json().unwrap();
        assert_eq!(view["resourceType"], "widget");
        assert_eq!(view["isStale"], true);
        assert_eq!(view["color"], "blue");
    }

    #[test]
    fn wire_body_strips_transient_fields() {
        let body = widget(true).wire_body().unwrap();
        let object = body.as_object().unwrap();
        assert!(!object.contains_key("resourceType"));
        assert!(!object.contains_key("isStale"));
        assert_eq!(body["metadata"]["uid"], "w-1");
    }

    #[test]
    fn primary_key_of_absent_instance_is_none() {
        let present = widget(false);
        assert_eq!(primary_key(Some(&present)), Some("w-1"));
        assert_eq!(primary_key::<Widget>(None), None);
    }

    #[tokio::test]
    async fn save_without_store_is_detached() {
        let err = widget(false).save().await.unwrap_err();
        assert!(matches!(err, CoreError::Detached));
    }
}
