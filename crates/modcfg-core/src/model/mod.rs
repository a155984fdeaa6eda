// ── Domain payloads ──

mod module_config;

pub use module_config::{
    BasicAuth, DeckhouseSettings, GROUP_RESOURCE_CHANNEL, GROUP_RESOURCE_PARAM, MODULE_CONFIG_TYPE,
    MODULE_CONFIGS_GROUP_RESOURCE, ModuleConfig, ModuleConfigSpec, NotificationAuth, ObjectMeta,
    Release, ReleaseNotification, ReleaseWindow, Weekday, module_config_descriptor,
};
