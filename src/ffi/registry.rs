//! Bridge Registry
//!
//! Central registry for loaded native libraries and the bridge built over
//! each. A library is loaded at most once per registry, on first request,
//! and stays loaded until it is shut down explicitly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use super::loader::NativeLibrary;
use crate::bridge::{ComputeBridge, DatabaseBridge};
use crate::config::BridgeConfig;
use crate::error::LoadError;

/// A library and the bridges constructed over it
#[derive(Default)]
struct Loaded {
    /// `None` for bridges registered over in-process functions
    library: Option<Arc<NativeLibrary>>,
    database: Option<Arc<DatabaseBridge>>,
    compute: Option<Arc<ComputeBridge>>,
}

/// Bridge Registry - one bridge per library name
pub struct BridgeRegistry {
    /// Directory the libraries are resolved under
    libs_root: PathBuf,
    /// Loaded libraries (name -> bridges)
    libraries: Mutex<HashMap<String, Loaded>>,
}

impl BridgeRegistry {
    /// Create an empty registry resolving libraries under `libs_root`
    pub fn new(libs_root: impl Into<PathBuf>) -> Self {
        Self {
            libs_root: libs_root.into(),
            libraries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.native.libs_root.clone())
    }

    pub fn libs_root(&self) -> &Path {
        &self.libs_root
    }

    /// The database bridge over library `name`, loading it on first use.
    ///
    /// Construction runs under the registry lock, so concurrent first use
    /// loads the library once and every caller gets the same bridge.
    pub fn database(&self, name: &str) -> Result<Arc<DatabaseBridge>, LoadError> {
        let mut libraries = self.libraries.lock();
        if let Some(bridge) = libraries.get(name).and_then(|l| l.database.clone()) {
            return Ok(bridge);
        }

        let library = self.library_locked(&mut libraries, name)?;
        let bridge = Arc::new(DatabaseBridge::load(&library)?);
        let entry = libraries.entry(name.to_string()).or_default();
        entry.library = Some(library);
        entry.database = Some(Arc::clone(&bridge));

        tracing::info!(target: "native_bridge::registry", name, "database bridge constructed");
        Ok(bridge)
    }

    /// The compute bridge over library `name`, loading it on first use.
    pub fn compute(&self, name: &str) -> Result<Arc<ComputeBridge>, LoadError> {
        let mut libraries = self.libraries.lock();
        if let Some(bridge) = libraries.get(name).and_then(|l| l.compute.clone()) {
            return Ok(bridge);
        }

        let library = self.library_locked(&mut libraries, name)?;
        let bridge = Arc::new(ComputeBridge::load(&library)?);
        let entry = libraries.entry(name.to_string()).or_default();
        entry.library = Some(library);
        entry.compute = Some(Arc::clone(&bridge));

        tracing::info!(target: "native_bridge::registry", name, "compute bridge constructed");
        Ok(bridge)
    }

    /// Register a database bridge built over in-process functions.
    ///
    /// Returns the bridge already registered under `name`, if any.
    pub fn register_database(&self, name: &str, bridge: DatabaseBridge) -> Arc<DatabaseBridge> {
        let mut libraries = self.libraries.lock();
        let entry = libraries.entry(name.to_string()).or_default();
        Arc::clone(entry.database.get_or_insert_with(|| Arc::new(bridge)))
    }

    /// Register a compute bridge built over in-process functions.
    pub fn register_compute(&self, name: &str, bridge: ComputeBridge) -> Arc<ComputeBridge> {
        let mut libraries = self.libraries.lock();
        let entry = libraries.entry(name.to_string()).or_default();
        Arc::clone(entry.compute.get_or_insert_with(|| Arc::new(bridge)))
    }

    /// Drop the bridges for `name` and release its library.
    ///
    /// The library is unloaded once the last outstanding bridge reference
    /// and in-flight completion are gone. The next request for `name`
    /// loads it afresh. Returns false when nothing was loaded.
    pub fn shutdown(&self, name: &str) -> bool {
        let removed = self.libraries.lock().remove(name).is_some();
        if removed {
            tracing::info!(target: "native_bridge::registry", name, "library shut down");
        }
        removed
    }

    /// Shut down every loaded library
    pub fn shutdown_all(&self) {
        let names: Vec<String> = self.libraries.lock().drain().map(|(name, _)| name).collect();
        for name in names {
            tracing::info!(target: "native_bridge::registry", name = %name, "library shut down");
        }
    }

    /// Names with at least one constructed bridge, sorted
    pub fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self.libraries.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn library_locked(
        &self,
        libraries: &mut HashMap<String, Loaded>,
        name: &str,
    ) -> Result<Arc<NativeLibrary>, LoadError> {
        if let Some(library) = libraries.get(name).and_then(|l| l.library.clone()) {
            return Ok(library);
        }
        NativeLibrary::open(&self.libs_root, name)
            .map(Arc::new)
            .inspect_err(|e| tracing::error!(target: "native_bridge::registry", name, error = %e, "load failed"))
    }
}

static GLOBAL: OnceCell<BridgeRegistry> = OnceCell::new();

/// The process-wide registry.
///
/// Initialised on first use from `native-bridge.toml` (searched upward from
/// the working directory) unless [`install_global`] ran first.
pub fn global() -> &'static BridgeRegistry {
    GLOBAL.get_or_init(|| {
        let config = BridgeConfig::load_from_cwd().unwrap_or_else(|e| {
            tracing::warn!(target: "native_bridge::registry", error = %e, "using default configuration");
            BridgeConfig::default()
        });
        BridgeRegistry::from_config(&config)
    })
}

/// Install `registry` as the process-wide registry.
///
/// Fails, handing the registry back, when the global one already exists.
pub fn install_global(registry: BridgeRegistry) -> Result<&'static BridgeRegistry, BridgeRegistry> {
    GLOBAL.set(registry)?;
    Ok(global())
}

impl std::fmt::Debug for BridgeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeRegistry")
            .field("libs_root", &self.libs_root)
            .field("loaded", &self.loaded())
            .finish()
    }
}
