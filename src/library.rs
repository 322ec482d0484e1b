//! Symbol Resolution
//!
//! Loads shared libraries through the OS loader (via libloading) and
//! resolves exported symbols to callable addresses.
//!
//! A resolved [`NativeAddress`] holds a reference to its library, so any
//! handle built from it keeps the library loaded. The library is unloaded
//! when the last `Library` clone and the last address derived from it are
//! dropped.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::error::{DowncallError, DowncallResult};
use crate::memory::Address;

struct LibraryInner {
    path: PathBuf,
    handle: libloading::Library,
    /// Resolved symbol cache
    symbols: RwLock<HashMap<String, usize>>,
}

/// A loaded shared library
#[derive(Clone)]
pub struct Library {
    inner: Arc<LibraryInner>,
}

impl Library {
    /// Load a library from the given path (or a name the OS loader can find)
    pub fn open(path: impl AsRef<Path>) -> DowncallResult<Self> {
        let path = path.as_ref().to_path_buf();

        // Safety: loading a library runs its initializers. The caller
        // vouches for the library it names.
        let handle = unsafe {
            libloading::Library::new(&path).map_err(|e| DowncallError::LibraryNotFound {
                name: path.display().to_string(),
                reason: e.to_string(),
            })?
        };
        debug!("loaded library {}", path.display());

        Ok(Self {
            inner: Arc::new(LibraryInner {
                path,
                handle,
                symbols: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Path (or name) the library was opened with
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Resolve an exported symbol by its exact name.
    ///
    /// No mangling is applied; pass the external name as the linker sees it.
    pub fn lookup(&self, name: &str) -> DowncallResult<NativeAddress> {
        if let Some(&addr) = self.inner.symbols.read().get(name) {
            return Ok(self.address(addr));
        }

        let not_found = || DowncallError::SymbolNotFound {
            symbol: name.to_string(),
            library: self.inner.path.display().to_string(),
        };

        // Safety: the symbol is only read as an address here; the call
        // shape is supplied later by a CallDescriptor.
        let addr = unsafe {
            let symbol: libloading::Symbol<*const ()> = self
                .inner
                .handle
                .get(name.as_bytes())
                .map_err(|_| not_found())?;
            *symbol as usize
        };
        if addr == 0 {
            return Err(not_found());
        }

        debug!(
            "resolved {} in {} at {:#x}",
            name,
            self.inner.path.display(),
            addr
        );
        self.inner.symbols.write().insert(name.to_string(), addr);
        Ok(self.address(addr))
    }

    fn address(&self, addr: usize) -> NativeAddress {
        NativeAddress {
            addr: Address::new(addr),
            owner: Some(self.clone()),
        }
    }

    /// True when both values refer to the same loaded library
    pub fn same_as(&self, other: &Library) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("path", &self.inner.path)
            .finish()
    }
}

/// Callable address of a native function
#[derive(Clone)]
pub struct NativeAddress {
    addr: Address,
    owner: Option<Library>,
}

impl NativeAddress {
    /// Wrap an address obtained outside the resolver.
    ///
    /// # Safety
    ///
    /// `addr` must point to a function that stays valid for as long as any
    /// handle bound to it is used.
    pub unsafe fn from_raw(addr: Address) -> Self {
        Self { addr, owner: None }
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    /// Library keeping this address valid, if it came from a lookup
    pub fn library(&self) -> Option<&Library> {
        self.owner.as_ref()
    }
}

impl fmt::Debug for NativeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeAddress")
            .field("addr", &self.addr)
            .field("library", &self.owner.as_ref().map(|l| l.path().to_path_buf()))
            .finish()
    }
}

/// Library loader with search paths and a by-name cache
pub struct LibraryLoader {
    search_paths: Vec<PathBuf>,
    libraries: RwLock<HashMap<String, Library>>,
}

impl LibraryLoader {
    pub fn new() -> Self {
        Self {
            search_paths: default_search_paths(),
            libraries: RwLock::new(HashMap::new()),
        }
    }

    /// Add a search path (searched after the defaults)
    pub fn add_search_path(&mut self, path: impl AsRef<Path>) {
        self.search_paths.push(path.as_ref().to_path_buf());
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find a library file by path or bare name
    pub fn find_library(&self, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if path.exists() {
            return Some(path.to_path_buf());
        }

        let file_name = library_filename(name);
        self.search_paths
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.exists())
    }

    /// Load a library by name, reusing an already loaded one.
    ///
    /// Names not found on the search paths are handed to the OS loader
    /// as-is, so sonames like `libc.so.6` still resolve.
    pub fn load(&self, name: &str) -> DowncallResult<Library> {
        if let Some(lib) = self.libraries.read().get(name) {
            return Ok(lib.clone());
        }

        let library = match self.find_library(name) {
            Some(path) => Library::open(path)?,
            None => Library::open(name)?,
        };

        // Another thread may have won the race; keep the first one.
        let mut libraries = self.libraries.write();
        let entry = libraries
            .entry(name.to_string())
            .or_insert_with(|| library.clone());
        Ok(entry.clone())
    }

    /// Get a loaded library
    pub fn get(&self, name: &str) -> Option<Library> {
        self.libraries.read().get(name).cloned()
    }

    /// Drop the loader's reference. The library stays loaded while handles
    /// or addresses still use it.
    pub fn unload(&self, name: &str) -> bool {
        self.libraries.write().remove(name).is_some()
    }

    pub fn loaded_libraries(&self) -> Vec<String> {
        self.libraries.read().keys().cloned().collect()
    }
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// System directories probed for libraries given by bare name
#[cfg(target_os = "linux")]
const SYSTEM_LIB_DIRS: &[&str] = &["/usr/lib", "/usr/local/lib", "/lib", "/lib64", "/usr/lib64"];
#[cfg(target_os = "macos")]
const SYSTEM_LIB_DIRS: &[&str] = &["/usr/lib", "/usr/local/lib", "/opt/homebrew/lib"];
#[cfg(windows)]
const SYSTEM_LIB_DIRS: &[&str] = &["C:\\Windows\\System32"];
#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
const SYSTEM_LIB_DIRS: &[&str] = &["/usr/lib", "/usr/local/lib"];

/// Variable the platform's dynamic loader consults for extra directories
#[cfg(target_os = "macos")]
const LOADER_PATH_ENV: &str = "DYLD_LIBRARY_PATH";
#[cfg(windows)]
const LOADER_PATH_ENV: &str = "PATH";
#[cfg(not(any(target_os = "macos", windows)))]
const LOADER_PATH_ENV: &str = "LD_LIBRARY_PATH";

/// Directories a fresh loader searches, in order: the working directory,
/// the system library directories, then the loader's path variable.
fn default_search_paths() -> Vec<PathBuf> {
    let cwd = std::env::current_dir().ok();
    let system = SYSTEM_LIB_DIRS.iter().map(PathBuf::from);
    let from_env = std::env::var_os(LOADER_PATH_ENV)
        .map(|value| {
            std::env::split_paths(&value)
                .filter(|dir| !dir.as_os_str().is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    cwd.into_iter().chain(system).chain(from_env).collect()
}

/// File name the platform gives a shared library called `name`.
///
/// Names that already carry the platform prefix and suffix (`libc.so.6`,
/// `libm.dylib`, `kernel32.dll`) are returned unchanged.
pub fn library_filename(name: &str) -> String {
    use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};

    if name.starts_with(DLL_PREFIX) && name.contains(DLL_SUFFIX) {
        name.to_string()
    } else {
        format!("{DLL_PREFIX}{name}{DLL_SUFFIX}")
    }
}
