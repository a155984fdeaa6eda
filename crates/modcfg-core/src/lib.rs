//! Typed reactive resource cache between `modcfg-api` and the CLI.
//!
//! - **[`ResourceRegistry`]**: per-type configuration. Route template,
//!   verb table ([`VerbSpec`]), cache policy, transient fields and the
//!   primary-key pointer, registered once via
//!   [`ResourceDescriptor::builder`].
//!
//! - **[`CacheStore<T>`]**: one per resource type. `DashMap` entries moving
//!   through [`CacheState`] `Empty → Fetching → Ready → Stale`, with
//!   single-flight [`get_or_fetch`](CacheStore::get_or_fetch), stale-marking
//!   [`invalidate`](CacheStore::invalidate) and write-through
//!   [`put`](CacheStore::put). Transitions are observable through
//!   [`EntryStream`].
//!
//! - **[`Resource<T>`]**: a hydrated record. Exposes its primary key,
//!   an in-memory JSON view with the type tag and staleness flag, and
//!   [`save`](Resource::save), which strips transient fields before sending.
//!
//! - **[`Subscriptions`]**: cable channel bindings. Matching events become
//!   invalidations; [`Subscriptions::run`] drives them from a broadcast
//!   receiver.
//!
//! - **[`ResourceClient`]**: facade bundling all of the above, plus
//!   [`bootstrap_module_configs`] for the deckhouse [`ModuleConfig`].

pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod registry;
pub mod resource;
pub mod store;
pub mod stream;
pub mod subscription;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::{ResourceClient, bootstrap_module_configs};
pub use config::{ClientConfig, TlsVerification};
pub use error::CoreError;
pub use registry::{
    CachePolicy, ResolvedRoute, ResourceDescriptor, ResourceRegistry, VerbSpec, verbs,
};
pub use resource::{Payload, Resource, primary_key};
pub use store::{CacheState, CacheStore, EntryChange, Normalizer};
pub use stream::EntryStream;
pub use subscription::{
    Invalidate, Invalidation, InvalidationScope, SubscriptionBinding, Subscriptions,
};
pub use transport::Transport;

pub use model::{DeckhouseSettings, ModuleConfig, Release, ReleaseWindow, Weekday};
