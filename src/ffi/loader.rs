//! Dynamic Library Loader
//!
//! Safe wrapper around libloading for loading the native libraries the
//! bridges call into. A library named `crypto-db` under libs root `./libs`
//! resolves to `./libs/crypto-db/target/release/libcrypto_db.so` on Linux.

use std::path::{Path, PathBuf};

use libloading::Library;

use crate::error::LoadError;

/// A loaded native library
pub struct NativeLibrary {
    /// Logical library name
    name: String,
    /// Path the library was loaded from
    path: PathBuf,
    /// The loaded library handle
    library: Library,
}

impl NativeLibrary {
    /// Resolve `name` under `libs_root` and load it.
    pub fn open(libs_root: impl AsRef<Path>, name: &str) -> Result<Self, LoadError> {
        let path = library_path(libs_root.as_ref(), name)?;
        Self::load(name, path)
    }

    /// Load a library from an explicit path
    pub fn load(name: &str, path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            tracing::error!(target: "native_bridge::loader", path = %path.display(), "library missing");
            return Err(LoadError::NotFound { path });
        }

        // Safety: loading a library runs its initialisers. The path comes
        // from configuration the operator controls.
        let library = unsafe {
            Library::new(&path).map_err(|e| LoadError::Open {
                path: path.clone(),
                reason: e.to_string(),
            })?
        };

        tracing::info!(target: "native_bridge::loader", name, path = %path.display(), "library loaded");

        Ok(Self {
            name: name.to_string(),
            path,
            library,
        })
    }

    /// Logical name this library was loaded under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the path to this library
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve an exported function and copy its pointer out.
    ///
    /// # Safety
    ///
    /// `T` must be the exact function pointer type of the exported symbol.
    /// The returned pointer is only valid while this library stays loaded.
    pub unsafe fn symbol<T: Copy>(&self, symbol: &'static str) -> Result<T, LoadError> {
        let sym = self
            .library
            .get::<T>(symbol.as_bytes())
            .map_err(|e| LoadError::MissingSymbol {
                library: self.name.clone(),
                symbol,
                reason: e.to_string(),
            })?;
        Ok(*sym)
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}

/// Directory a library's release artifact lives in.
pub fn library_dir(libs_root: &Path, name: &str) -> PathBuf {
    libs_root.join(name).join("target").join("release")
}

/// Full path of a library's release artifact for this platform.
pub fn library_path(libs_root: &Path, name: &str) -> Result<PathBuf, LoadError> {
    Ok(library_dir(libs_root, name).join(library_filename(name)?))
}

/// Construct the platform-specific library filename.
///
/// Hyphens become underscores, matching the artifact names cargo emits.
pub fn library_filename(name: &str) -> Result<String, LoadError> {
    let stem = name.replace('-', "_");

    #[cfg(target_os = "linux")]
    {
        Ok(format!("lib{}.so", stem))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(format!("lib{}.dylib", stem))
    }

    #[cfg(target_os = "windows")]
    {
        Ok(format!("{}.dll", stem))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        let _ = stem;
        Err(LoadError::UnsupportedPlatform(std::env::consts::OS))
    }
}
