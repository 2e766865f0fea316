//! Mounted codebases.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;

use crate::core::archive::{entry_names, read_manifest, ArchiveInfo, MANIFEST_NAME};
use crate::core::library::{library_names_from_entries, validate_module_name, validate_segment};
use crate::loader::module::{Module, Value};
use crate::loader::resolver::ModuleResolver;
use crate::loader::ImportError;
use crate::ops::unique::{default_prefix, namespace, NamespaceOptions};
use crate::util::fs::absolute;

/// A module bound under a name, as `import a.b` binds `a`.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Name the caller should bind the module to
    pub name: String,
    /// The bound module
    pub module: Arc<Module>,
}

/// Import primitives shared by both kinds of codebase.
pub trait Importer {
    /// The resolver the codebase is mounted on.
    fn resolver(&self) -> &ModuleResolver;

    /// The full dotted name `name` resolves to, failing once the codebase
    /// is closed.
    fn qualify(&self, name: &str) -> Result<String, ImportError>;

    /// Import a module of the codebase, like `importlib.import_module`.
    fn import_module(&self, name: &str) -> Result<Arc<Module>, ImportError> {
        let qualified = self.qualify(name)?;
        tracing::debug!("Trying to import {}", qualified);
        self.resolver().import_module(&qualified)
    }

    /// Import a module the way an `import` statement would bind it.
    ///
    /// Without an alias, `a.b` imports `a.b` but binds the top-level `a`;
    /// with one, the alias is bound to `a.b` itself.
    fn import_as(&self, name: &str, alias: Option<&str>) -> Result<Binding, ImportError> {
        let module = self.import_module(name)?;
        if let Some(alias) = alias {
            validate_segment(alias)?;
            return Ok(Binding {
                name: alias.to_string(),
                module,
            });
        }
        match name.split_once('.') {
            Some((top, _)) => Ok(Binding {
                name: top.to_string(),
                module: self.import_module(top)?,
            }),
            None => Ok(Binding {
                name: name.to_string(),
                module,
            }),
        }
    }

    /// `from name import member`.
    ///
    /// The member is looked up as an attribute first and imported as the
    /// submodule `name.member` only when that fails.
    fn from_import(&self, name: &str, member: &str) -> Result<Value, ImportError> {
        let module = self.import_module(name)?;
        lookup_member(self, &module, name, member)
    }

    /// `from name import a, b, ...`, returning values in request order.
    fn from_import_many(&self, name: &str, members: &[&str]) -> Result<Vec<Value>, ImportError> {
        let module = self.import_module(name)?;
        members
            .iter()
            .map(|member| lookup_member(self, &module, name, member))
            .collect()
    }
}

fn lookup_member<I: Importer + ?Sized>(
    importer: &I,
    module: &Module,
    name: &str,
    member: &str,
) -> Result<Value, ImportError> {
    match module.getattr(member) {
        Ok(value) => Ok(value),
        Err(_) => importer
            .import_module(&format!("{}.{}", name, member))
            .map(Value::Module),
    }
}

fn library_list(names: &BTreeSet<String>) -> String {
    names.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// An archive mounted as is, with its libraries importable by bare name.
///
/// Only one should be live at a time: two mounted plain archives that
/// share a library name shadow each other. Use [`UniqueCodebase`] to load
/// several.
#[derive(Debug)]
pub struct Codebase {
    resolver: ModuleResolver,
    archive: PathBuf,
    library_names: BTreeSet<String>,
    shadowed: usize,
    mounted: bool,
}

impl Codebase {
    /// Mount `archive` on the process-wide resolver.
    pub fn open(archive: impl AsRef<Path>) -> Result<Self, ImportError> {
        Self::open_with(ModuleResolver::global(), archive)
    }

    /// Mount `archive` on `resolver`.
    pub fn open_with(resolver: &ModuleResolver, archive: impl AsRef<Path>) -> Result<Self, ImportError> {
        let archive = absolute(archive.as_ref())?;
        let info = ArchiveInfo::read(&archive)?;

        let live = resolver.register_single_mount();
        if live > 0 {
            tracing::warn!(
                "{} other codebase(s) are already mounted; modules with the same name will \
                 shadow each other. Use UniqueCodebase to load several codebases at once.",
                live
            );
        }
        if let Err(e) = resolver.mount(&archive) {
            resolver.release_single_mount();
            return Err(e);
        }

        tracing::info!("Found libraries in codebase: {}", library_list(&info.library_names));
        Ok(Codebase {
            resolver: resolver.clone(),
            archive,
            library_names: info.library_names,
            shadowed: live,
            mounted: true,
        })
    }

    /// Path of the mounted archive.
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    pub fn library_names(&self) -> &BTreeSet<String> {
        &self.library_names
    }

    /// How many other single-mount codebases were live when this one was
    /// opened.
    pub fn shadowed(&self) -> usize {
        self.shadowed
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Unmount the archive.
    ///
    /// Modules imported before closing keep working; later imports fail.
    pub fn close(&mut self) -> Result<(), ImportError> {
        if !self.mounted {
            return Err(ImportError::NotMounted {
                path: self.archive.clone(),
            });
        }
        self.mounted = false;
        self.resolver.release_single_mount();
        self.resolver.unmount(&self.archive)?;
        self.resolver.invalidate_caches();
        Ok(())
    }
}

impl Importer for Codebase {
    fn resolver(&self) -> &ModuleResolver {
        &self.resolver
    }

    fn qualify(&self, name: &str) -> Result<String, ImportError> {
        if !self.mounted {
            return Err(ImportError::NotMounted {
                path: self.archive.clone(),
            });
        }
        validate_module_name(name)?;
        Ok(name.to_string())
    }
}

impl Drop for Codebase {
    fn drop(&mut self) {
        if self.mounted {
            let _ = self.close();
        }
    }
}

/// Options for [`UniqueCodebase`].
#[derive(Debug, Clone)]
pub struct UniqueOptions {
    /// Namespace a private copy of the archive before mounting it.
    ///
    /// When false the archive must already be namespaced and is mounted
    /// directly.
    pub make_unique: bool,

    /// Prefix for the private copy; timestamped when `None`.
    pub prefix: Option<String>,
}

impl Default for UniqueOptions {
    fn default() -> Self {
        UniqueOptions {
            make_unique: true,
            prefix: None,
        }
    }
}

/// An archive mounted under its own namespace prefix.
///
/// `import_module("pkg.mod")` resolves `<prefix>.pkg.mod`, so any number of
/// unique codebases can be mounted side by side.
#[derive(Debug)]
pub struct UniqueCodebase {
    resolver: ModuleResolver,
    source: PathBuf,
    mounted_path: PathBuf,
    prefix: String,
    claimed: bool,
    library_names: BTreeSet<String>,
    mounted: bool,
    // Declared last so the copy is deleted after everything else.
    _copy: Option<NamedTempFile>,
}

impl UniqueCodebase {
    /// Namespace and mount `archive` on the process-wide resolver.
    pub fn open(archive: impl AsRef<Path>) -> Result<Self, ImportError> {
        Self::open_with(ModuleResolver::global(), archive, &UniqueOptions::default())
    }

    /// Mount `archive` on `resolver`.
    pub fn open_with(
        resolver: &ModuleResolver,
        archive: impl AsRef<Path>,
        opts: &UniqueOptions,
    ) -> Result<Self, ImportError> {
        let source = absolute(archive.as_ref())?;

        let (mounted_path, copy, prefix, claimed, library_names) = if opts.make_unique {
            let base = opts.prefix.clone().unwrap_or_else(default_prefix);
            let prefix = resolver.claim_prefix(&base);
            if opts.prefix.is_some() && prefix != base {
                tracing::warn!("Prefix `{}` is taken; using `{}`", base, prefix);
            }

            let copy = match make_copy() {
                Ok(copy) => copy,
                Err(e) => {
                    resolver.release_prefix(&prefix);
                    return Err(e);
                }
            };
            tracing::info!(
                "Making unique copy of {} at {}",
                source.display(),
                copy.path().display()
            );
            let namespaced = namespace(
                &source,
                copy.path(),
                &NamespaceOptions::default().with_prefix(prefix.clone()),
            );
            let result = match namespaced {
                Ok(result) => result,
                Err(e) => {
                    resolver.release_prefix(&prefix);
                    return Err(e.into());
                }
            };
            (
                copy.path().to_path_buf(),
                Some(copy),
                result.prefix,
                true,
                result.library_names,
            )
        } else {
            tracing::warn!(
                "Mounting {} without namespacing it; it must already be namespaced",
                source.display()
            );
            let (prefix, library_names) = read_prefix(&source)?;
            resolver.claim_exact_prefix(&prefix)?;
            (source.clone(), None, prefix, true, library_names)
        };

        if let Err(e) = resolver.mount(&mounted_path) {
            if claimed {
                resolver.release_prefix(&prefix);
            }
            return Err(e);
        }

        tracing::info!("Found libraries in codebase: {}", library_list(&library_names));
        tracing::debug!("Libraries are importable as {}.<library>", prefix);

        Ok(UniqueCodebase {
            resolver: resolver.clone(),
            source,
            mounted_path,
            prefix,
            claimed,
            library_names,
            mounted: true,
            _copy: copy,
        })
    }

    /// The namespace prefix, e.g. `codebase_20240131093000`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The archive this codebase was opened from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// The archive actually on the search path.
    pub fn mounted_path(&self) -> &Path {
        &self.mounted_path
    }

    pub fn library_names(&self) -> &BTreeSet<String> {
        &self.library_names
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Unmount the namespaced archive.
    pub fn close(&mut self) -> Result<(), ImportError> {
        if !self.mounted {
            return Err(ImportError::NotMounted {
                path: self.mounted_path.clone(),
            });
        }
        self.mounted = false;
        if self.claimed {
            self.resolver.release_prefix(&self.prefix);
        }
        self.resolver.unmount(&self.mounted_path)?;
        self.resolver.invalidate_caches();
        Ok(())
    }
}

impl Importer for UniqueCodebase {
    fn resolver(&self) -> &ModuleResolver {
        &self.resolver
    }

    fn qualify(&self, name: &str) -> Result<String, ImportError> {
        if !self.mounted {
            return Err(ImportError::NotMounted {
                path: self.mounted_path.clone(),
            });
        }
        validate_module_name(name)?;
        Ok(format!("{}.{}", self.prefix, name))
    }
}

impl Drop for UniqueCodebase {
    fn drop(&mut self) {
        if self.mounted {
            let _ = self.close();
        }
    }
}

fn make_copy() -> Result<NamedTempFile, ImportError> {
    tempfile::Builder::new()
        .prefix("codebase")
        .suffix(".zip")
        .tempfile()
        .map_err(|source| ImportError::Io {
            path: std::env::temp_dir(),
            source,
        })
}

/// Prefix and library names of an already namespaced archive.
///
/// The prefix is the first path segment of the first entry.
fn read_prefix(archive: &Path) -> Result<(String, BTreeSet<String>), ImportError> {
    let names = entry_names(archive)?;
    let prefix = names
        .first()
        .and_then(|name| name.split_once('/'))
        .map(|(first, _)| first.to_string())
        .filter(|first| validate_segment(first).is_ok())
        .ok_or_else(|| ImportError::NotNamespaced {
            path: archive.to_path_buf(),
        })?;

    let manifest = read_manifest(archive, &format!("{}/{}", prefix, MANIFEST_NAME))?;
    let library_names = manifest
        .unwrap_or_else(|| library_names_from_entries(names.iter().map(String::as_str), 1));
    Ok((prefix, library_names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::archive::ArchiveWriter;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tracing_subscriber::fmt::MakeWriter;

    /// Log output captured from a scoped subscriber.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn archive(path: &Path, entries: &[(&str, &str)]) {
        let mut writer = ArchiveWriter::create(path).unwrap();
        for (name, content) in entries {
            writer.add_file(name, content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    fn sample(tmp: &Path) -> PathBuf {
        let zip = tmp.join("code.zip");
        archive(
            &zip,
            &[
                ("a.py", "import pkg.mod \nNAME = 'a'\n"),
                ("pkg/__init__.py", ""),
                ("pkg/mod.py", "def f():\n    return 1\n"),
                (MANIFEST_NAME, r#"["a","pkg"]"#),
            ],
        );
        zip
    }

    #[test]
    fn test_codebase_imports_bare_names() {
        let tmp = TempDir::new().unwrap();
        let zip = sample(tmp.path());
        let resolver = ModuleResolver::new();

        let mut codebase = Codebase::open_with(&resolver, &zip).unwrap();
        assert_eq!(
            codebase.library_names().iter().cloned().collect::<Vec<_>>(),
            vec!["a", "pkg"]
        );

        let module = codebase.import_module("pkg.mod").unwrap();
        assert_eq!(module.name(), "pkg.mod");
        assert!(module.getattr("f").unwrap().is_callable());

        codebase.close().unwrap();
        assert!(resolver.search_path().is_empty());
        assert!(matches!(
            codebase.import_module("a"),
            Err(ImportError::NotMounted { .. })
        ));
        assert!(codebase.close().is_err());
    }

    #[test]
    fn test_second_codebase_still_mounts() {
        let tmp = TempDir::new().unwrap();
        let zip = sample(tmp.path());
        let resolver = ModuleResolver::new();

        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();

        let (first, second) = tracing::subscriber::with_default(subscriber, || {
            let first = Codebase::open_with(&resolver, &zip).unwrap();
            assert!(!logs.contents().contains("WARN"));
            let second = Codebase::open_with(&resolver, &zip).unwrap();
            (first, second)
        });
        assert_eq!(first.shadowed(), 0);
        assert_eq!(second.shadowed(), 1);
        assert_eq!(resolver.search_path().len(), 2);

        let output = logs.contents();
        assert!(output.contains("WARN"), "{}", output);
        assert!(output.contains("1 other codebase(s) are already mounted"));
        assert!(output.contains("UniqueCodebase"));

        drop(first);
        drop(second);
        assert!(resolver.search_path().is_empty());
        let third = Codebase::open_with(&resolver, &zip).unwrap();
        assert_eq!(third.shadowed(), 0);
    }

    #[test]
    fn test_import_as_binds_top_level() {
        let tmp = TempDir::new().unwrap();
        let zip = sample(tmp.path());
        let resolver = ModuleResolver::new();
        let codebase = UniqueCodebase::open_with(&resolver, &zip, &UniqueOptions::default()).unwrap();

        let binding = codebase.import_as("pkg.mod", None).unwrap();
        assert_eq!(binding.name, "pkg");
        assert_eq!(binding.module.name(), format!("{}.pkg", codebase.prefix()));

        let binding = codebase.import_as("pkg.mod", Some("m")).unwrap();
        assert_eq!(binding.name, "m");
        assert_eq!(binding.module.short_name(), "mod");

        let binding = codebase.import_as("a", None).unwrap();
        assert_eq!(binding.name, "a");
        assert!(binding.module.has_attr("NAME"));
    }

    #[test]
    fn test_from_import_falls_back_to_submodule() {
        let tmp = TempDir::new().unwrap();
        let zip = sample(tmp.path());
        let resolver = ModuleResolver::new();
        let codebase = UniqueCodebase::open_with(&resolver, &zip, &UniqueOptions::default()).unwrap();

        let f = codebase.from_import("pkg.mod", "f").unwrap();
        assert!(f.is_callable());

        let values = codebase.from_import_many("pkg", &["mod", "mod"]).unwrap();
        assert_eq!(values.len(), 2);
        assert!(values.iter().all(|v| v.as_module().is_some()));

        // The submodule failure is what surfaces.
        assert!(matches!(
            codebase.from_import("pkg", "missing"),
            Err(ImportError::ModuleNotFound { name }) if name.ends_with("pkg.missing")
        ));
    }

    #[test]
    fn test_same_archive_twice_is_collision_free() {
        let tmp = TempDir::new().unwrap();
        let zip = sample(tmp.path());
        let resolver = ModuleResolver::new();

        let first = UniqueCodebase::open_with(&resolver, &zip, &UniqueOptions::default()).unwrap();
        let second = UniqueCodebase::open_with(&resolver, &zip, &UniqueOptions::default()).unwrap();
        assert_ne!(first.prefix(), second.prefix());

        let a1 = first.import_module("a").unwrap();
        let a2 = second.import_module("a").unwrap();
        assert!(!Arc::ptr_eq(&a1, &a2));
        assert_eq!(a1.name(), format!("{}.a", first.prefix()));
        assert_eq!(a2.name(), format!("{}.a", second.prefix()));

        // The rewritten import points into each copy's own prefix.
        let source = a2.source().unwrap();
        assert!(source.contains(&format!("import {}.pkg.mod ", second.prefix())));
    }

    #[test]
    fn test_close_restores_search_path_and_removes_copy() {
        let tmp = TempDir::new().unwrap();
        let zip = sample(tmp.path());
        let resolver = ModuleResolver::with_search_path(vec![tmp.path().to_path_buf()]);
        let before = resolver.search_path();

        let mut codebase = UniqueCodebase::open_with(&resolver, &zip, &UniqueOptions::default()).unwrap();
        let copy = codebase.mounted_path().to_path_buf();
        assert!(copy.exists());
        assert_eq!(resolver.search_path()[0], copy);

        codebase.close().unwrap();
        assert_eq!(resolver.search_path(), before);
        drop(codebase);
        assert!(!copy.exists());
    }

    #[test]
    fn test_mount_prenamespaced_archive() {
        let tmp = TempDir::new().unwrap();
        let zip = sample(tmp.path());
        let namespaced = tmp.path().join("ns.zip");
        namespace(&zip, &namespaced, &NamespaceOptions::default().with_prefix("ns1")).unwrap();

        let resolver = ModuleResolver::new();
        let opts = UniqueOptions {
            make_unique: false,
            prefix: None,
        };
        let codebase = UniqueCodebase::open_with(&resolver, &namespaced, &opts).unwrap();
        assert_eq!(codebase.prefix(), "ns1");
        assert_eq!(codebase.mounted_path(), namespaced.as_path());
        assert!(codebase
            .import_module("pkg.mod")
            .unwrap()
            .getattr("f")
            .unwrap()
            .is_callable());

        let err = UniqueCodebase::open_with(&resolver, &zip, &opts).unwrap_err();
        assert!(matches!(err, ImportError::NotNamespaced { .. }));
    }

    #[test]
    fn test_prenamespaced_prefix_is_not_reused() {
        let tmp = TempDir::new().unwrap();
        let one = tmp.path().join("one.zip");
        let two = tmp.path().join("two.zip");
        archive(&one, &[("a.py", "ONE = 1\n")]);
        archive(&two, &[("a.py", "TWO = 2\n")]);
        let one_ns = tmp.path().join("one_ns.zip");
        namespace(&one, &one_ns, &NamespaceOptions::default().with_prefix("p")).unwrap();

        let resolver = ModuleResolver::new();
        let direct = UniqueOptions {
            make_unique: false,
            prefix: None,
        };
        let mut first = UniqueCodebase::open_with(&resolver, &one_ns, &direct).unwrap();

        // A copy asking for the same prefix is moved aside.
        let asked = UniqueOptions {
            make_unique: true,
            prefix: Some("p".to_string()),
        };
        let second = UniqueCodebase::open_with(&resolver, &two, &asked).unwrap();
        assert_eq!(first.prefix(), "p");
        assert_eq!(second.prefix(), "p_2");
        assert!(first.import_module("a").unwrap().has_attr("ONE"));
        assert!(!first.import_module("a").unwrap().has_attr("TWO"));
        assert!(second.import_module("a").unwrap().has_attr("TWO"));

        // Mounting the same namespaced archive again is refused.
        let err = UniqueCodebase::open_with(&resolver, &one_ns, &direct).unwrap_err();
        assert!(matches!(err, ImportError::PrefixInUse { prefix } if prefix == "p"));
        assert_eq!(resolver.search_path().len(), 2);

        // Closing releases the prefix.
        first.close().unwrap();
        assert!(UniqueCodebase::open_with(&resolver, &one_ns, &direct).is_ok());
    }
}
