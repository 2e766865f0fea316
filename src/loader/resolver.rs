//! Module resolution service.
//!
//! A [`ModuleResolver`] owns an ordered search path of archives and
//! directories, a cache of per-entry finders, and a cache of imported
//! modules. Handles are cheap to clone and share one state, so every
//! codebase mounted through the same resolver sees the same search path.
//!
//! Resolution follows the host interpreter's rules:
//!
//! - `a.b` imports `a` first and then looks for `b` only where `a` lives;
//! - a directory with `__init__.py` is a regular package and wins at the
//!   first search path entry that has it;
//! - `name.py` is a plain module;
//! - a directory without `__init__.py` is a portion of a namespace package,
//!   which collects the matching directories of every search path entry.
//!   Its portions are recomputed whenever the search path changes.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use zip::ZipArchive;

use crate::core::library::{validate_module_name, PACKAGE_MARKER, SOURCE_EXTENSION};
use crate::loader::module::{Module, ModuleKind, SearchLocation};
use crate::loader::ImportError;

/// Shared module resolution state.
#[derive(Debug, Clone, Default)]
pub struct ModuleResolver {
    inner: Arc<Mutex<ResolverState>>,
}

#[derive(Debug, Default)]
struct ResolverState {
    /// Search path, highest priority first
    search_path: Vec<PathBuf>,

    /// Finder per search path entry
    finders: HashMap<PathBuf, Arc<Finder>>,

    /// Imported modules by full dotted name
    modules: HashMap<String, Arc<Module>>,

    /// Prefixes claimed by namespaced codebases
    prefixes: HashSet<String>,

    /// Live single-mount codebases
    single_mounts: usize,
}

/// Index of one search path entry.
#[derive(Debug)]
enum Finder {
    Archive {
        path: PathBuf,
        files: BTreeSet<String>,
        dirs: BTreeSet<String>,
    },
    Directory {
        root: PathBuf,
    },
}

impl Finder {
    /// Index `entry`, or `None` if it does not exist.
    fn open(entry: &Path) -> Result<Option<Self>, ImportError> {
        if entry.is_dir() {
            return Ok(Some(Finder::Directory {
                root: entry.to_path_buf(),
            }));
        }
        if !entry.is_file() {
            return Ok(None);
        }

        let archive = open_archive(entry)?;
        let mut files = BTreeSet::new();
        let mut dirs = BTreeSet::new();
        for name in archive.file_names() {
            let mut parts: Vec<&str> = name.trim_end_matches('/').split('/').collect();
            if !name.ends_with('/') {
                files.insert(name.to_string());
                parts.pop();
            }
            for i in 1..=parts.len() {
                dirs.insert(parts[..i].join("/"));
            }
        }

        Ok(Some(Finder::Archive {
            path: entry.to_path_buf(),
            files,
            dirs,
        }))
    }

    fn is_file(&self, rel: &str) -> bool {
        match self {
            Finder::Archive { files, .. } => files.contains(rel),
            Finder::Directory { root } => root.join(rel).is_file(),
        }
    }

    fn is_dir(&self, rel: &str) -> bool {
        match self {
            Finder::Archive { dirs, .. } => dirs.contains(rel),
            Finder::Directory { root } => root.join(rel).is_dir(),
        }
    }

    fn read(&self, rel: &str) -> Result<String, ImportError> {
        let bytes = match self {
            Finder::Archive { path, .. } => {
                let mut archive = open_archive(path)?;
                let mut file = archive.by_name(rel).map_err(|source| ImportError::Archive {
                    path: path.clone(),
                    source,
                })?;
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes).map_err(|source| ImportError::Io {
                    path: path.join(rel),
                    source,
                })?;
                bytes
            }
            Finder::Directory { root } => {
                let path = root.join(rel);
                std::fs::read(&path).map_err(|source| ImportError::Io { path, source })?
            }
        };
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>, ImportError> {
    let file = File::open(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ZipArchive::new(file).map_err(|source| ImportError::Archive {
        path: path.to_path_buf(),
        source,
    })
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// What a lookup of one name segment found.
enum Spec {
    Module {
        entry: PathBuf,
        file: String,
    },
    Package {
        entry: PathBuf,
        file: String,
        dir: String,
    },
    Namespace {
        portions: Vec<SearchLocation>,
    },
}

impl ModuleResolver {
    /// Create a resolver with an empty search path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a resolver with an initial search path, highest priority first.
    pub fn with_search_path(paths: Vec<PathBuf>) -> Self {
        let resolver = Self::new();
        resolver.state().search_path = paths;
        resolver
    }

    /// The process-wide resolver used by [`Codebase::open`](crate::loader::Codebase::open).
    pub fn global() -> &'static ModuleResolver {
        static GLOBAL: OnceLock<ModuleResolver> = OnceLock::new();
        GLOBAL.get_or_init(ModuleResolver::new)
    }

    fn state(&self) -> MutexGuard<'_, ResolverState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether two handles share the same state.
    pub fn same_as(&self, other: &ModuleResolver) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Snapshot of the search path, highest priority first.
    pub fn search_path(&self) -> Vec<PathBuf> {
        self.state().search_path.clone()
    }

    /// Put `entry` at the front of the search path.
    pub fn mount(&self, entry: &Path) -> Result<(), ImportError> {
        if !entry.exists() {
            return Err(ImportError::Io {
                path: entry.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        let mut state = self.state();
        state.search_path.insert(0, entry.to_path_buf());
        state.invalidate();
        tracing::debug!("Mounted {}", entry.display());
        Ok(())
    }

    /// Remove `entry` from the search path and forget every module loaded
    /// from it.
    ///
    /// Handles obtained before unmounting stay valid. Other cached state is
    /// left alone until [`invalidate_caches`](Self::invalidate_caches).
    pub fn unmount(&self, entry: &Path) -> Result<(), ImportError> {
        let mut state = self.state();
        let Some(pos) = state.search_path.iter().position(|p| p == entry) else {
            return Err(ImportError::NotMounted {
                path: entry.to_path_buf(),
            });
        };
        state.search_path.remove(pos);
        state.finders.remove(entry);

        let before = state.modules.len();
        state.modules.retain(|_, module| !module.comes_from(entry));
        tracing::debug!(
            "Unmounted {} ({} modules evicted)",
            entry.display(),
            before - state.modules.len()
        );
        Ok(())
    }

    /// Whether `entry` is on the search path.
    pub fn is_mounted(&self, entry: &Path) -> bool {
        self.state().search_path.iter().any(|p| p == entry)
    }

    /// Drop every cached finder so the next import re-indexes the search
    /// path, and recompute the portions of imported namespace packages.
    pub fn invalidate_caches(&self) {
        self.state().invalidate();
    }

    /// An already imported module.
    pub fn cached(&self, name: &str) -> Option<Arc<Module>> {
        self.state().modules.get(name).cloned()
    }

    /// Import a module by its full dotted name.
    pub fn import_module(&self, name: &str) -> Result<Arc<Module>, ImportError> {
        validate_module_name(name)?;
        let mut state = self.state();
        state.import(name)
    }

    /// Claim a prefix not used by any other namespaced codebase, starting
    /// from `base` and adding a counter on collision.
    pub(crate) fn claim_prefix(&self, base: &str) -> String {
        let mut state = self.state();
        let mut prefix = base.to_string();
        let mut n = 1;
        while state.prefix_taken(&prefix) {
            n += 1;
            prefix = format!("{}_{}", base, n);
        }
        state.prefixes.insert(prefix.clone());
        prefix
    }

    /// Claim exactly `prefix`, failing if another codebase holds it.
    pub(crate) fn claim_exact_prefix(&self, prefix: &str) -> Result<(), ImportError> {
        let mut state = self.state();
        if state.prefix_taken(prefix) {
            return Err(ImportError::PrefixInUse {
                prefix: prefix.to_string(),
            });
        }
        state.prefixes.insert(prefix.to_string());
        Ok(())
    }

    pub(crate) fn release_prefix(&self, prefix: &str) {
        self.state().prefixes.remove(prefix);
    }

    /// Register a single-mount codebase; returns how many were already live.
    pub(crate) fn register_single_mount(&self) -> usize {
        let mut state = self.state();
        state.single_mounts += 1;
        state.single_mounts - 1
    }

    pub(crate) fn release_single_mount(&self) {
        let mut state = self.state();
        state.single_mounts = state.single_mounts.saturating_sub(1);
    }
}

impl ResolverState {
    fn prefix_taken(&self, prefix: &str) -> bool {
        self.prefixes.contains(prefix) || self.modules.contains_key(prefix)
    }

    fn top_level_locations(&self) -> Vec<SearchLocation> {
        self.search_path
            .iter()
            .map(|entry| SearchLocation {
                entry: entry.clone(),
                dir: String::new(),
            })
            .collect()
    }

    fn invalidate(&mut self) {
        self.finders.clear();
        self.refresh_namespaces();
    }

    /// Recompute the portions of every imported namespace package against
    /// the current search path, parents before children.
    fn refresh_namespaces(&mut self) {
        let mut names: Vec<String> = self
            .modules
            .iter()
            .filter(|(_, module)| module.kind() == ModuleKind::NamespacePackage)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_by_key(|name| name.matches('.').count());

        for name in names {
            let (locations, segment) = match name.rsplit_once('.') {
                Some((parent, segment)) => match self.modules.get(parent) {
                    Some(parent) => (parent.locations(), segment),
                    None => continue,
                },
                None => (self.top_level_locations(), name.as_str()),
            };
            match self.find_spec(segment, &locations) {
                Ok(Some(Spec::Namespace { portions })) => {
                    if let Some(module) = self.modules.get(&name) {
                        module.set_locations(portions);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Keeping portions of {}: {}", name, e),
            }
        }
    }

    fn import(&mut self, name: &str) -> Result<Arc<Module>, ImportError> {
        if let Some(module) = self.modules.get(name) {
            return Ok(Arc::clone(module));
        }

        let (parent, segment) = match name.rsplit_once('.') {
            Some((parent, segment)) => (Some(self.import(parent)?), segment),
            None => (None, name),
        };

        let locations = match &parent {
            Some(parent) if !parent.is_package() => {
                return Err(ImportError::ModuleNotFound {
                    name: name.to_string(),
                })
            }
            Some(parent) => parent.locations(),
            None => self.top_level_locations(),
        };

        let spec = self
            .find_spec(segment, &locations)?
            .ok_or_else(|| ImportError::ModuleNotFound {
                name: name.to_string(),
            })?;

        let module = match spec {
            Spec::Module { entry, file } => {
                let source = self.finder(&entry)?.map(|f| f.read(&file)).transpose()?;
                Module::new(name.to_string(), ModuleKind::Module, entry, Some(file), source, vec![])
            }
            Spec::Package { entry, file, dir } => {
                let source = self.finder(&entry)?.map(|f| f.read(&file)).transpose()?;
                let location = SearchLocation {
                    entry: entry.clone(),
                    dir,
                };
                Module::new(
                    name.to_string(),
                    ModuleKind::Package,
                    entry,
                    Some(file),
                    source,
                    vec![location],
                )
            }
            Spec::Namespace { portions } => {
                let entry = portions[0].entry.clone();
                Module::new(
                    name.to_string(),
                    ModuleKind::NamespacePackage,
                    entry,
                    None,
                    None,
                    portions,
                )
            }
        };

        let module = Arc::new(module);
        tracing::debug!("Imported {} from {:?}", name, module.origin());
        if let Some(parent) = parent {
            parent.add_submodule(&module);
        }
        self.modules.insert(name.to_string(), Arc::clone(&module));
        Ok(module)
    }

    fn finder(&mut self, entry: &Path) -> Result<Option<Arc<Finder>>, ImportError> {
        if let Some(finder) = self.finders.get(entry) {
            return Ok(Some(Arc::clone(finder)));
        }
        let Some(finder) = Finder::open(entry)? else {
            return Ok(None);
        };
        let finder = Arc::new(finder);
        self.finders.insert(entry.to_path_buf(), Arc::clone(&finder));
        Ok(Some(finder))
    }

    fn find_spec(
        &mut self,
        segment: &str,
        locations: &[SearchLocation],
    ) -> Result<Option<Spec>, ImportError> {
        let mut portions = Vec::new();

        for location in locations {
            let Some(finder) = self.finder(&location.entry)? else {
                continue;
            };
            let dir = join(&location.dir, segment);
            let marker = join(&dir, PACKAGE_MARKER);
            let file = format!("{}.{}", dir, SOURCE_EXTENSION);

            if finder.is_dir(&dir) && finder.is_file(&marker) {
                return Ok(Some(Spec::Package {
                    entry: location.entry.clone(),
                    file: marker,
                    dir,
                }));
            }
            if finder.is_file(&file) {
                return Ok(Some(Spec::Module {
                    entry: location.entry.clone(),
                    file,
                }));
            }
            if finder.is_dir(&dir) {
                portions.push(SearchLocation {
                    entry: location.entry.clone(),
                    dir,
                });
            }
        }

        if portions.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Spec::Namespace { portions }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archive::ArchiveWriter;
    use crate::loader::module::Value;
    use tempfile::TempDir;

    fn archive(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = ArchiveWriter::create(path).unwrap();
        for (name, content) in entries {
            writer.add_file(name, content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_mount_and_unmount_restore_search_path() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.zip");
        let b = tmp.path().join("b.zip");
        archive(&a, &[("x.py", "")]);
        archive(&b, &[("y.py", "")]);

        let base = vec![tmp.path().join("site")];
        let resolver = ModuleResolver::with_search_path(base.clone());
        resolver.mount(&a).unwrap();
        resolver.mount(&b).unwrap();
        assert_eq!(resolver.search_path(), vec![b.clone(), a.clone(), base[0].clone()]);

        // Removing from the middle is allowed.
        resolver.unmount(&a).unwrap();
        assert_eq!(resolver.search_path(), vec![b.clone(), base[0].clone()]);
        resolver.unmount(&b).unwrap();
        assert_eq!(resolver.search_path(), base);

        assert!(matches!(
            resolver.unmount(&b),
            Err(ImportError::NotMounted { .. })
        ));
    }

    #[test]
    fn test_import_from_archive() {
        let tmp = TempDir::new().unwrap();
        let zip = tmp.path().join("code.zip");
        archive(
            &zip,
            &[
                ("pkg/__init__.py", "VERSION = '1'\n"),
                ("pkg/mod.py", "def f():\n    return 1\n"),
                ("single.py", "class Thing:\n    pass\n"),
            ],
        );

        let resolver = ModuleResolver::new();
        resolver.mount(&zip).unwrap();

        let module = resolver.import_module("pkg.mod").unwrap();
        assert_eq!(module.kind(), ModuleKind::Module);
        assert!(module.getattr("f").unwrap().is_callable());
        assert_eq!(module.origin(), Some(zip.join("pkg/mod.py")));

        let pkg = resolver.cached("pkg").unwrap();
        assert_eq!(pkg.kind(), ModuleKind::Package);
        assert!(matches!(pkg.getattr("mod").unwrap(), Value::Module(_)));
        assert!(pkg.has_attr("VERSION"));

        let single = resolver.import_module("single").unwrap();
        assert!(single.getattr("Thing").unwrap().is_callable());

        // Same handle from the cache.
        assert!(Arc::ptr_eq(&module, &resolver.import_module("pkg.mod").unwrap()));
    }

    #[test]
    fn test_missing_modules() {
        let tmp = TempDir::new().unwrap();
        let zip = tmp.path().join("code.zip");
        archive(&zip, &[("single.py", "")]);
        let resolver = ModuleResolver::new();
        resolver.mount(&zip).unwrap();

        assert!(matches!(
            resolver.import_module("nothing"),
            Err(ImportError::ModuleNotFound { name }) if name == "nothing"
        ));
        // A plain module has no submodules.
        assert!(matches!(
            resolver.import_module("single.child"),
            Err(ImportError::ModuleNotFound { name }) if name == "single.child"
        ));
        assert!(matches!(
            resolver.import_module("bad-name"),
            Err(ImportError::InvalidName(_))
        ));
    }

    #[test]
    fn test_regular_package_shadows_later_entries() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("first.zip");
        let second = tmp.path().join("second.zip");
        archive(&first, &[("pkg/__init__.py", ""), ("pkg/a.py", "")]);
        archive(&second, &[("pkg/__init__.py", ""), ("pkg/b.py", "")]);

        let resolver = ModuleResolver::new();
        resolver.mount(&second).unwrap();
        resolver.mount(&first).unwrap();

        assert!(resolver.import_module("pkg.a").is_ok());
        assert!(resolver.import_module("pkg.b").is_err());
    }

    #[test]
    fn test_namespace_package_spans_entries() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("first.zip");
        let dir = tmp.path().join("tree");
        archive(&first, &[("shared/a.py", "A = 1\n")]);
        std::fs::create_dir_all(dir.join("shared")).unwrap();
        std::fs::write(dir.join("shared/b.py"), "B = 2\n").unwrap();

        let resolver = ModuleResolver::new();
        resolver.mount(&dir).unwrap();
        resolver.mount(&first).unwrap();

        let shared = resolver.import_module("shared").unwrap();
        assert_eq!(shared.kind(), ModuleKind::NamespacePackage);
        assert!(shared.origin().is_none());
        assert!(resolver.import_module("shared.a").unwrap().has_attr("A"));
        assert!(resolver.import_module("shared.b").unwrap().has_attr("B"));
    }

    #[test]
    fn test_namespace_package_picks_up_later_mounts() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.zip");
        let b = tmp.path().join("b.zip");
        archive(&a, &[("shared/x.py", "X = 1\n"), ("shared/deep/p.py", "")]);
        archive(&b, &[("shared/y.py", "Y = 2\n"), ("shared/deep/q.py", "")]);

        let resolver = ModuleResolver::new();
        resolver.mount(&a).unwrap();
        let shared = resolver.import_module("shared").unwrap();
        assert!(resolver.import_module("shared.x").is_ok());
        assert!(resolver.import_module("shared.deep.p").is_ok());
        assert!(resolver.import_module("shared.y").is_err());

        resolver.mount(&b).unwrap();
        assert!(resolver.import_module("shared.y").unwrap().has_attr("Y"));
        assert!(resolver.import_module("shared.deep.q").is_ok());
        // Same package object, with both portions.
        assert!(Arc::ptr_eq(&shared, &resolver.import_module("shared").unwrap()));
        assert!(shared.comes_from(&a) && shared.comes_from(&b));
        assert!(shared.has_attr("x") && shared.has_attr("y"));
    }

    #[test]
    fn test_invalidate_caches_rereads_archives() {
        let tmp = TempDir::new().unwrap();
        let zip = tmp.path().join("code.zip");
        archive(&zip, &[("first.py", "")]);

        let resolver = ModuleResolver::new();
        resolver.mount(&zip).unwrap();
        assert!(resolver.import_module("first").is_ok());

        archive(&zip, &[("first.py", ""), ("second.py", "")]);
        assert!(resolver.import_module("second").is_err());
        resolver.invalidate_caches();
        assert!(resolver.import_module("second").is_ok());
    }

    #[test]
    fn test_unmount_evicts_modules() {
        let tmp = TempDir::new().unwrap();
        let zip = tmp.path().join("code.zip");
        archive(&zip, &[("lib.py", "X = 1\n")]);

        let resolver = ModuleResolver::new();
        resolver.mount(&zip).unwrap();
        let held = resolver.import_module("lib").unwrap();
        resolver.unmount(&zip).unwrap();

        assert!(resolver.cached("lib").is_none());
        assert!(resolver.import_module("lib").is_err());
        // The handle taken before unmounting still works.
        assert!(held.has_attr("X"));

        // Replacing the archive and mounting again is not served stale entries.
        archive(&zip, &[("lib.py", "Y = 2\n")]);
        resolver.mount(&zip).unwrap();
        let fresh = resolver.import_module("lib").unwrap();
        assert!(fresh.has_attr("Y"));
        assert!(!fresh.has_attr("X"));
    }

    #[test]
    fn test_claim_prefix_avoids_collisions() {
        let resolver = ModuleResolver::new();
        assert_eq!(resolver.claim_prefix("codebase_1"), "codebase_1");
        assert_eq!(resolver.claim_prefix("codebase_1"), "codebase_1_2");
        resolver.release_prefix("codebase_1");
        assert_eq!(resolver.claim_prefix("codebase_1"), "codebase_1");
    }

    #[test]
    fn test_claim_exact_prefix() {
        let resolver = ModuleResolver::new();
        resolver.claim_exact_prefix("p").unwrap();
        assert!(matches!(
            resolver.claim_exact_prefix("p"),
            Err(ImportError::PrefixInUse { prefix }) if prefix == "p"
        ));
        // An exact claim pushes generated prefixes aside too.
        assert_eq!(resolver.claim_prefix("p"), "p_2");
        resolver.release_prefix("p");
        assert!(resolver.claim_exact_prefix("p").is_ok());
    }

    #[test]
    fn test_independent_resolvers() {
        let a = ModuleResolver::new();
        let b = ModuleResolver::new();
        assert!(!a.same_as(&b));
        assert!(a.same_as(&a.clone()));
        assert_eq!(a.register_single_mount(), 0);
        assert_eq!(a.register_single_mount(), 1);
        assert_eq!(b.register_single_mount(), 0);
    }
}
