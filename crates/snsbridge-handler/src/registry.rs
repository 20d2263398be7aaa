//! Handler library loading and invocation.

use crate::{HandlerError, HandlerKind, HandlerSpec, RawHandler};
use libloading::Library;
use serde_json::Value;
use std::collections::HashMap;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;
use tracing::{debug, info};

/// When a handler library is (re)loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReloadPolicy {
    /// Load the library fresh on every invocation. Edits to the handler
    /// always take effect on the next notification.
    #[default]
    EveryInvocation,
    /// Keep the library loaded and reload only when its file's modification
    /// time changes.
    OnChange,
}

struct CachedModule {
    library: Library,
    modified: Option<SystemTime>,
}

/// Loads handler libraries from a source directory and invokes them.
pub struct HandlerRegistry {
    source_dir: PathBuf,
    policy: ReloadPolicy,
    cache: Mutex<HashMap<PathBuf, CachedModule>>,
}

impl HandlerRegistry {
    pub fn new(source_dir: impl Into<PathBuf>, policy: ReloadPolicy) -> Self {
        Self {
            source_dir: source_dir.into(),
            policy,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Invoke a handler with the event and context documents.
    ///
    /// Dynamic handlers are resolved on every call according to the reload
    /// policy; errors surface per-invocation. The handler runs synchronously
    /// and its failure is the caller's to propagate.
    pub fn invoke(
        &self,
        kind: &HandlerKind,
        event: &Value,
        context: &Value,
    ) -> Result<(), HandlerError> {
        match kind {
            HandlerKind::Default => {
                info!("context={} event={}", context, event);
                Ok(())
            }
            HandlerKind::Dynamic(dotted) => {
                let spec = HandlerSpec::parse(dotted)?;
                self.invoke_dynamic(&spec, event, context)
            }
        }
    }

    fn invoke_dynamic(
        &self,
        spec: &HandlerSpec,
        event: &Value,
        context: &Value,
    ) -> Result<(), HandlerError> {
        let path = self.module_path(&spec.module)?;
        let event_c = CString::new(event.to_string())?;
        let context_c = CString::new(context.to_string())?;

        // One notification is dispatched at a time; the cache lock is held
        // across the call so the library cannot be unloaded underneath it.
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

        let status = match self.policy {
            ReloadPolicy::EveryInvocation => {
                // Fresh load, dropped (and unloaded) after the call.
                let library = load_library(&path)?;
                call(&library, spec, &path, &event_c, &context_c)?
            }
            ReloadPolicy::OnChange => {
                let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
                let stale = match cache.get(&path) {
                    Some(cached) => cached.modified != modified,
                    None => true,
                };
                if stale {
                    debug!("Loading handler module {}", path.display());
                    let library = load_library(&path)?;
                    cache.insert(path.clone(), CachedModule { library, modified });
                }
                let cached = cache
                    .get(&path)
                    .expect("module cached immediately above");
                call(&cached.library, spec, &path, &event_c, &context_c)?
            }
        };

        if status != 0 {
            return Err(HandlerError::Invocation {
                spec: spec.to_string(),
                code: status,
            });
        }
        Ok(())
    }

    /// Resolve `<module>` to a library file, trying the bare and
    /// platform-prefixed names.
    fn module_path(&self, module: &str) -> Result<PathBuf, HandlerError> {
        let candidates = [
            self.source_dir.join(format!("{module}{DLL_SUFFIX}")),
            self.source_dir
                .join(format!("{DLL_PREFIX}{module}{DLL_SUFFIX}")),
        ];
        candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| HandlerError::ModuleMissing {
                module: module.to_string(),
                dir: self.source_dir.clone(),
                tried: candidates.to_vec(),
            })
    }
}

fn load_library(path: &Path) -> Result<Library, HandlerError> {
    // SAFETY: loading runs the library's initializers; the library is
    // developer-supplied code that this tool exists to execute.
    unsafe { Library::new(path) }.map_err(|source| HandlerError::ModuleLoad {
        path: path.to_path_buf(),
        source,
    })
}

fn call(
    library: &Library,
    spec: &HandlerSpec,
    path: &Path,
    event: &CString,
    context: &CString,
) -> Result<i32, HandlerError> {
    // SAFETY: the symbol must match `RawHandler`; that is the documented
    // handler ABI contract. The CStrings outlive the call.
    let handler = unsafe { library.get::<RawHandler>(spec.function.as_bytes()) }.map_err(
        |source| HandlerError::NotFound {
            function: spec.function.clone(),
            path: path.to_path_buf(),
            source,
        },
    )?;
    Ok(unsafe { handler(event.as_ptr(), context.as_ptr()) })
}
