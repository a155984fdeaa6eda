// ── Deckhouse ModuleConfig ──
//
// Typed view of the `moduleconfigs.deckhouse.io` record for the `deckhouse`
// module. Every level keeps unknown keys in `extra` so a save never drops
// fields this client does not know about.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use modcfg_api::HttpMethod;

use crate::error::CoreError;
use crate::registry::{CachePolicy, ResourceDescriptor, VerbSpec, verbs};
use crate::resource::Resource;

/// Registry key of the deckhouse module config.
pub const MODULE_CONFIG_TYPE: &str = "deckhouse";
/// Cable channel broadcasting Kubernetes object changes.
pub const GROUP_RESOURCE_CHANNEL: &str = "GroupResourceChannel";
/// Filter param naming the group/resource on [`GROUP_RESOURCE_CHANNEL`].
pub const GROUP_RESOURCE_PARAM: &str = "groupResource";
pub const MODULE_CONFIGS_GROUP_RESOURCE: &str = "moduleconfigs.deckhouse.io";

/// Descriptor for the config of `module` (`get`: GET stored, `update`: PUT not stored).
pub fn module_config_descriptor(module: &str) -> Result<ResourceDescriptor, CoreError> {
    ResourceDescriptor::builder(
        MODULE_CONFIG_TYPE,
        format!("k8s/deckhouse.io/moduleconfigs/{module}"),
    )
    .verb(
        verbs::GET,
        VerbSpec::new(HttpMethod::Get).store_response(true),
    )
    .verb(verbs::UPDATE, VerbSpec::new(HttpMethod::Put))
    .cache_policy(CachePolicy {
        dynamic_cache: false,
    })
    .primary_key_pointer("/metadata/uid")
    .build()
}

// ── Record ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ModuleConfigSpec,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub status: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfigSpec {
    pub settings: DeckhouseSettings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModuleConfig {
    pub fn settings(&self) -> &DeckhouseSettings {
        &self.spec.settings
    }

    pub fn settings_mut(&mut self) -> &mut DeckhouseSettings {
        &mut self.spec.settings
    }

    /// Normalizer that fills an absent `release` block with an empty one.
    pub fn default_release(mut self) -> Self {
        self.spec.settings.release.get_or_insert_with(Release::default);
        self
    }
}

impl Resource<ModuleConfig> {
    pub fn settings(&self) -> &DeckhouseSettings {
        self.payload().settings()
    }

    /// Pending settings for the next `save`.
    pub fn settings_mut(&mut self) -> &mut DeckhouseSettings {
        self.payload_mut().settings_mut()
    }
}

// ── Settings ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckhouseSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    pub release_channel: String,
    /// Absent on clusters that never configured release policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disruption_approval_mode: Option<String>,
    /// `None` when absent; an explicit empty list is kept as `Some(vec![])`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<Vec<ReleaseWindow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<ReleaseNotification>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Time window in which updates may be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseWindow {
    /// Absent means every day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<Weekday>>,
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseNotification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimal_notification_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<NotificationAuth>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic: Option<BasicAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn full() -> Value {
        json!({
            "apiVersion": "deckhouse.io/v1alpha1",
            "kind": "ModuleConfig",
            "metadata": {
                "name": "deckhouse",
                "uid": "uid-1",
                "resourceVersion": "4242",
                "generation": 3
            },
            "spec": {
                "version": 1,
                "settings": {
                    "bundle": "Default",
                    "logLevel": "Info",
                    "releaseChannel": "Stable",
                    "release": {
                        "mode": "Auto",
                        "disruptionApprovalMode": "Manual",
                        "windows": [{
                            "days": ["Mon", "Sat"],
                            "from": "01:00",
                            "to": "03:00",
                            "timezone": "UTC"
                        }],
                        "notification": {
                            "webhook": "https://hooks.example.com/dh",
                            "minimalNotificationTime": "6h",
                            "retries": 3,
                            "auth": {
                                "basic": { "username": "ops", "password": "hunter2", "realm": "dh" },
                                "tlsSkipVerify": false
                            }
                        }
                    },
                    "update": { "legacy": true }
                }
            },
            "status": { "message": "", "version": "1" }
        })
    }

    #[test]
    fn decodes_every_known_field() {
        let config: ModuleConfig = serde_json::from_value(full()).unwrap();
        let settings = config.settings();

        assert_eq!(config.metadata.uid, "uid-1");
        assert_eq!(settings.release_channel, "Stable");
        assert_eq!(settings.log_level.as_deref(), Some("Info"));

        let release = settings.release.as_ref().unwrap();
        assert_eq!(release.mode.as_deref(), Some("Auto"));
        let window = &release.windows.as_ref().unwrap()[0];
        assert_eq!(window.days, Some(vec![Weekday::Mon, Weekday::Sat]));
        let auth = release.notification.as_ref().unwrap().auth.as_ref().unwrap();
        assert_eq!(auth.basic.as_ref().unwrap().username, "ops");
    }

    #[test]
    fn unknown_fields_round_trip() {
        let config: ModuleConfig = serde_json::from_value(full()).unwrap();
        assert_eq!(serde_json::to_value(&config).unwrap(), full());

        let notification = config.settings().release.as_ref().unwrap().notification.as_ref();
        let notification = notification.unwrap();
        assert_eq!(notification.extra["retries"], 3);
        let auth = notification.auth.as_ref().unwrap();
        assert_eq!(auth.extra["tlsSkipVerify"], false);
        assert_eq!(auth.basic.as_ref().unwrap().extra["realm"], "dh");
    }

    #[test]
    fn explicit_empty_lists_round_trip() {
        let mut value = full();
        value["spec"]["settings"]["release"]["windows"] = json!([]);
        let config: ModuleConfig = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(config.settings().release.as_ref().unwrap().windows, Some(vec![]));
        assert_eq!(serde_json::to_value(&config).unwrap(), value);

        value["spec"]["settings"]["release"]["windows"] = json!([{ "from": "01:00", "to": "03:00" }]);
        let config: ModuleConfig = serde_json::from_value(value.clone()).unwrap();
        let encoded = serde_json::to_value(&config).unwrap();
        assert_eq!(encoded, value);
        assert!(encoded["spec"]["settings"]["release"]["windows"][0].get("days").is_none());
    }

    #[test]
    fn release_may_be_absent() {
        let config: ModuleConfig = serde_json::from_value(json!({
            "apiVersion": "deckhouse.io/v1alpha1",
            "kind": "ModuleConfig",
            "metadata": { "uid": "uid-2" },
            "spec": { "settings": { "releaseChannel": "EarlyAccess" } }
        }))
        .unwrap();

        assert!(config.settings().release.is_none());
        let encoded = serde_json::to_value(&config).unwrap();
        assert!(encoded["spec"]["settings"].get("release").is_none());
        assert!(encoded.get("status").is_none());

        let normalized = config.default_release();
        assert_eq!(normalized.settings().release, Some(Release::default()));
    }

    #[test]
    fn basic_auth_debug_hides_password() {
        let auth = BasicAuth {
            username: "ops".into(),
            password: "hunter2".into(),
            extra: Map::new(),
        };
        let rendered = format!("{auth:?}");
        assert!(rendered.contains("ops"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn descriptor_matches_module_route() {
        let descriptor = module_config_descriptor("deckhouse").unwrap();
        let get = descriptor.resolve(verbs::GET, &[("key", "uid-1")]).unwrap();
        assert_eq!(get.url, "k8s/deckhouse.io/moduleconfigs/deckhouse");
        assert!(get.store_response);
        assert!(!get.with_credentials);

        let update = descriptor.resolve(verbs::UPDATE, &[]).unwrap();
        assert_eq!(update.method, HttpMethod::Put);
        assert!(!update.store_response);
    }
}
