//! Transport backends and ABI negotiation
//!
//! A backend is the factory side of a transport: it enumerates devices and
//! opens them into a [`DeviceOps`]. Backends are registered under a protocol
//! id together with an entry function that decides whether the backend can
//! serve the caller's ABI version. Refusal is an ordinary outcome, not an
//! error.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::constants::{ABI_MAJOR_MASK, ABI_VERSION};
use crate::driver::config::{DeviceInfo, OpenFlags};
use crate::driver::ops::DeviceOps;
use crate::error::{ConfigError, ConfigResult, Result};

/// Factory for devices of one transport
pub trait Backend: Sync {
    /// Protocol id this backend answers to
    fn proto_id(&self) -> &'static str;

    /// Fill `out` with the devices present; returns how many were written.
    ///
    /// Callable before any device is opened.
    fn discovery(&self, out: &mut [DeviceInfo]) -> usize;

    /// Open `device` (a name from discovery, or a transport address)
    fn open(&self, device: &str, flags: OpenFlags) -> Result<Arc<dyn DeviceOps>>;
}

/// Backend entry point: returns the backend if it supports `abi_version`
pub type BackendEntry = fn(abi_version: u32) -> Option<&'static dyn Backend>;

/// `true` if a backend built for `supported` can serve `requested`
#[must_use]
pub const fn abi_compatible(supported: u32, requested: u32) -> bool {
    supported & ABI_MAJOR_MASK == requested & ABI_MAJOR_MASK && requested <= supported
}

/// Table of known backends keyed by protocol id
#[derive(Default)]
pub struct BackendRegistry {
    entries: BTreeMap<String, BackendEntry>,
}

impl BackendRegistry {
    /// Registry with no backends
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every backend compiled into the crate
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        // The table is empty, so this cannot collide
        let _ = registry.register(crate::sim::PROTO_ID, crate::sim::backend_entry);
        registry
    }

    /// Add a backend under `proto`
    pub fn register(&mut self, proto: &str, entry: BackendEntry) -> ConfigResult<()> {
        if self.entries.contains_key(proto) {
            warn!("backend '{proto}' registered twice");
            return Err(ConfigError::DuplicateBackend);
        }
        self.entries.insert(proto.to_owned(), entry);
        debug!("backend '{proto}' registered");
        Ok(())
    }

    /// Registered protocol ids, sorted
    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Backend for `proto` at this crate's ABI version
    pub fn resolve(&self, proto: &str) -> Option<&'static dyn Backend> {
        self.resolve_with_abi(proto, ABI_VERSION)
    }

    /// Backend for `proto` at `abi_version`; `None` if unknown or refused
    pub fn resolve_with_abi(&self, proto: &str, abi_version: u32) -> Option<&'static dyn Backend> {
        let entry = self.entries.get(proto)?;
        let backend = entry(abi_version);
        if backend.is_none() {
            debug!("backend '{proto}' refused ABI {abi_version:#010x}");
        }
        backend
    }

    /// Like [`BackendRegistry::resolve`], telling an unknown protocol apart
    /// from a refused ABI
    pub fn require(&self, proto: &str) -> ConfigResult<&'static dyn Backend> {
        if !self.entries.contains_key(proto) {
            return Err(ConfigError::UnknownBackend);
        }
        self.resolve(proto).ok_or(ConfigError::IncompatibleAbi)
    }

    /// Run discovery on every backend that accepts this ABI
    pub fn discover_all(&self) -> Vec<DeviceInfo> {
        let mut found = Vec::new();
        let mut scratch = vec![DeviceInfo::default(); 16];
        for proto in self.entries.keys() {
            let Some(backend) = self.resolve(proto) else {
                continue;
            };
            let count = backend.discovery(&mut scratch).min(scratch.len());
            found.extend(scratch.iter_mut().take(count).map(core::mem::take));
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refuse_all(_abi: u32) -> Option<&'static dyn Backend> {
        None
    }

    #[test]
    fn abi_major_must_match() {
        assert!(abi_compatible(0x0100_0001, 0x0100_0001));
        assert!(abi_compatible(0x0100_0005, 0x0100_0001));
        assert!(!abi_compatible(0x0100_0001, 0x0100_0002));
        assert!(!abi_compatible(0x0200_0001, 0x0100_0001));
    }

    #[test]
    fn builtin_contains_sim() {
        let registry = BackendRegistry::builtin();
        assert_eq!(registry.protocols().collect::<Vec<_>>(), vec![crate::sim::PROTO_ID]);
        assert!(registry.resolve(crate::sim::PROTO_ID).is_some());
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let mut registry = BackendRegistry::builtin();
        assert_eq!(
            registry.register(crate::sim::PROTO_ID, refuse_all),
            Err(ConfigError::DuplicateBackend)
        );
    }

    #[test]
    fn refusal_is_none_not_error() {
        let mut registry = BackendRegistry::new();
        registry.register("picky", refuse_all).unwrap();
        assert!(registry.resolve("picky").is_none());
        assert!(registry.resolve("missing").is_none());
        assert_eq!(registry.require("picky").err(), Some(ConfigError::IncompatibleAbi));
        assert_eq!(registry.require("missing").err(), Some(ConfigError::UnknownBackend));
    }

    #[test]
    fn newer_abi_is_refused_by_sim() {
        let registry = BackendRegistry::builtin();
        assert!(registry.resolve_with_abi(crate::sim::PROTO_ID, 0x0200_0000).is_none());
    }

    #[test]
    fn discover_all_skips_refusing_backends() {
        let mut registry = BackendRegistry::builtin();
        registry.register("picky", refuse_all).unwrap();
        let found = registry.discover_all();
        assert!(!found.is_empty());
        assert!(found.iter().all(|d| d.proto == crate::sim::PROTO_ID));
    }
}
