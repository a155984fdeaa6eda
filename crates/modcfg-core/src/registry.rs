// ── Resource registry ──
//
// Static per-resource-type configuration: route template, verb table,
// cache policy, transient fields and primary-key location. Entries are
// registered once at startup and are immutable afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use modcfg_api::{ApiRequest, HttpMethod};

use crate::error::CoreError;

/// Well-known verb names.
pub mod verbs {
    /// Fetch one instance.
    pub const GET: &str = "get";
    /// Persist one instance.
    pub const UPDATE: &str = "update";
}

/// In-memory field carrying the resource type tag.
pub const TYPE_TAG_FIELD: &str = "resourceType";
/// In-memory field carrying the staleness flag.
pub const STALE_FIELD: &str = "isStale";

// ── Verb / cache policy ──────────────────────────────────────────────

/// How one verb maps onto HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerbSpec {
    pub method: HttpMethod,
    /// Write the response body into the cache.
    pub store_response: bool,
    /// Forward the configured bearer token.
    pub with_credentials: bool,
}

impl VerbSpec {
    pub const fn new(method: HttpMethod) -> Self {
        Self {
            method,
            store_response: false,
            with_credentials: false,
        }
    }

    pub const fn store_response(mut self, store: bool) -> Self {
        self.store_response = store;
        self
    }

    pub const fn with_credentials(mut self, forward: bool) -> Self {
        self.with_credentials = forward;
        self
    }
}

/// Cache behaviour for one resource type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachePolicy {
    /// Eagerly refetch entries as soon as they go stale, instead of on next read.
    pub dynamic_cache: bool,
}

// ── Resolved route ───────────────────────────────────────────────────

/// A verb resolved against a concrete set of path params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub url: String,
    pub method: HttpMethod,
    pub store_response: bool,
    pub with_credentials: bool,
}

impl ResolvedRoute {
    /// Bodyless transport request for this route.
    pub fn request(&self) -> ApiRequest {
        ApiRequest::new(self.method, self.url.clone()).with_credentials(self.with_credentials)
    }
}

// ── Descriptor ───────────────────────────────────────────────────────

/// Registry entry for one resource type.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    resource_type: String,
    route_template: String,
    verbs: BTreeMap<String, VerbSpec>,
    cache_policy: CachePolicy,
    transient_fields: Vec<String>,
    primary_key_pointer: String,
    type_tag: String,
}

impl ResourceDescriptor {
    /// Start a descriptor for `resource_type` served under `route_template`.
    ///
    /// Placeholders use `{name}` syntax; `{key}` is filled with the primary key.
    pub fn builder(
        resource_type: impl Into<String>,
        route_template: impl Into<String>,
    ) -> ResourceDescriptorBuilder {
        let resource_type = resource_type.into();
        ResourceDescriptorBuilder {
            descriptor: Self {
                type_tag: resource_type.clone(),
                resource_type,
                route_template: route_template.into(),
                verbs: BTreeMap::new(),
                cache_policy: CachePolicy::default(),
                transient_fields: vec![TYPE_TAG_FIELD.to_owned(), STALE_FIELD.to_owned()],
                primary_key_pointer: "/metadata/uid".to_owned(),
            },
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn route_template(&self) -> &str {
        &self.route_template
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    pub fn transient_fields(&self) -> &[String] {
        &self.transient_fields
    }

    pub fn primary_key_pointer(&self) -> &str {
        &self.primary_key_pointer
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn verb(&self, verb: &str) -> Option<&VerbSpec> {
        self.verbs.get(verb)
    }

    /// Resolve `verb` into a concrete URL and HTTP method.
    pub fn resolve(&self, verb: &str, params: &[(&str, &str)]) -> Result<ResolvedRoute, CoreError> {
        let spec = self.verbs.get(verb).ok_or_else(|| CoreError::UnknownVerb {
            resource_type: self.resource_type.clone(),
            verb: verb.to_owned(),
        })?;

        let url = expand_route(&self.route_template, params).map_err(|reason| {
            CoreError::configuration(format!(
                "cannot resolve route for '{}': {reason}",
                self.resource_type
            ))
        })?;

        Ok(ResolvedRoute {
            url,
            method: spec.method,
            store_response: spec.store_response,
            with_credentials: spec.with_credentials,
        })
    }
}

/// Builder returned by [`ResourceDescriptor::builder`].
#[derive(Debug)]
pub struct ResourceDescriptorBuilder {
    descriptor: ResourceDescriptor,
}

impl ResourceDescriptorBuilder {
    pub fn verb(mut self, name: impl Into<String>, spec: VerbSpec) -> Self {
        self.descriptor.verbs.insert(name.into(), spec);
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.descriptor.cache_policy = policy;
        self
    }

    /// Replace the transient-field set (defaults to the type tag and staleness flag).
    pub fn transient_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.descriptor.transient_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// JSON pointer to the primary key (defaults to `/metadata/uid`).
    pub fn primary_key_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.descriptor.primary_key_pointer = pointer.into();
        self
    }

    /// Type tag carried on in-memory instances (defaults to the resource type).
    pub fn type_tag(mut self, tag: impl Into<String>) -> Self {
        self.descriptor.type_tag = tag.into();
        self
    }

    pub fn build(self) -> Result<ResourceDescriptor, CoreError> {
        let d = self.descriptor;

        if d.resource_type.is_empty() {
            return Err(CoreError::configuration("resource type must not be empty"));
        }
        if d.route_template.is_empty() {
            return Err(CoreError::configuration(format!(
                "route template for '{}' must not be empty",
                d.resource_type
            )));
        }
        if !d.primary_key_pointer.starts_with('/') {
            return Err(CoreError::configuration(format!(
                "primary key pointer '{}' must start with '/'",
                d.primary_key_pointer
            )));
        }
        placeholders(&d.route_template).map_err(|reason| {
            CoreError::configuration(format!(
                "bad route template for '{}': {reason}",
                d.resource_type
            ))
        })?;

        Ok(d)
    }
}

// ── Route templates ──────────────────────────────────────────────────

/// Names of the `{param}` placeholders in a template, in order.
fn placeholders(template: &str) -> Result<Vec<&str>, String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unterminated placeholder in '{template}'"))?;
        let name = &after[..end];
        if name.is_empty() || name.contains('{') {
            return Err(format!("malformed placeholder in '{template}'"));
        }
        names.push(name);
        rest = &after[end + 1..];
    }
    Ok(names)
}

/// Substitute `{param}` placeholders. Unused params are ignored.
fn expand_route(template: &str, params: &[(&str, &str)]) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unterminated placeholder in '{template}'"))?;
        let name = &after[..end];
        let value = params
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| format!("missing path param '{name}'"))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

// ── Registry ─────────────────────────────────────────────────────────

/// Process-wide table of resource descriptors, keyed by resource type.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: DashMap<String, Arc<ResourceDescriptor>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource type. Fails if the type is already registered.
    pub fn register(&self, descriptor: ResourceDescriptor) -> Result<Arc<ResourceDescriptor>, CoreError> {
        match self.entries.entry(descriptor.resource_type.clone()) {
            Entry::Occupied(_) => Err(CoreError::configuration(format!(
                "resource type '{}' is already registered",
                descriptor.resource_type
            ))),
            Entry::Vacant(slot) => {
                tracing::debug!(
                    resource_type = %descriptor.resource_type,
                    route = %descriptor.route_template,
                    verbs = ?descriptor.verbs.keys().collect::<Vec<_>>(),
                    "registered resource type"
                );
                let descriptor = Arc::new(descriptor);
                slot.insert(Arc::clone(&descriptor));
                Ok(descriptor)
            }
        }
    }

    /// Look up a registered resource type.
    pub fn get(&self, resource_type: &str) -> Result<Arc<ResourceDescriptor>, CoreError> {
        self.entries
            .get(resource_type)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| {
                CoreError::configuration(format!("resource type '{resource_type}' is not registered"))
            })
    }

    /// Resolve `verb` for `resource_type` into a URL and HTTP method.
    pub fn resolve(
        &self,
        resource_type: &str,
        verb: &str,
        params: &[(&str, &str)],
    ) -> Result<ResolvedRoute, CoreError> {
        self.get(resource_type)?.resolve(verb, params)
    }

    pub fn contains(&self, resource_type: &str) -> bool {
        self.entries.contains_key(resource_type)
    }

    /// All registered resource types, sorted.
    pub fn resource_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.entries.iter().map(|r| r.key().clone()).collect();
        types.sort();
        types
    }
}
