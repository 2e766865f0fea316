//! Module handles.
//!
//! A [`Module`] is what an import resolves to: its dotted name, where it was
//! found, its source, and a table of the names its top level binds, read
//! off the source text by the scanner.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::loader::scanner::scan_attributes;
use crate::loader::ImportError;

/// What kind of module a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// A single source file.
    Module,
    /// A directory with a package marker.
    Package,
    /// A directory without a package marker, possibly spread over several
    /// search path entries.
    NamespacePackage,
}

/// A name bound at a module's top level.
#[derive(Debug, Clone)]
pub enum Value {
    /// `def name(...)` or `async def name(...)`
    Function(String),
    /// `class Name`
    Class(String),
    /// An assignment or an import binding
    Variable(String),
    /// An imported submodule
    Module(Arc<Module>),
}

impl Value {
    /// The bound name.
    pub fn name(&self) -> &str {
        match self {
            Value::Function(name) | Value::Class(name) | Value::Variable(name) => name,
            Value::Module(module) => module.short_name(),
        }
    }

    /// Whether calling the value makes sense.
    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Class(_))
    }

    /// The module, when this value is one.
    pub fn as_module(&self) -> Option<&Arc<Module>> {
        match self {
            Value::Module(module) => Some(module),
            _ => None,
        }
    }
}

/// A location a package searches for its submodules: a search path entry
/// plus a `/`-separated directory inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SearchLocation {
    pub entry: PathBuf,
    pub dir: String,
}

/// An imported module.
pub struct Module {
    name: String,
    kind: ModuleKind,
    entry: PathBuf,
    file: Option<String>,
    source: Option<String>,
    attributes: BTreeMap<String, Value>,
    submodules: Mutex<BTreeMap<String, Arc<Module>>>,
    locations: Mutex<Vec<SearchLocation>>,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("origin", &self.origin())
            .finish()
    }
}

impl Module {
    pub(crate) fn new(
        name: String,
        kind: ModuleKind,
        entry: PathBuf,
        file: Option<String>,
        source: Option<String>,
        locations: Vec<SearchLocation>,
    ) -> Self {
        let attributes = source.as_deref().map(scan_attributes).unwrap_or_default();
        Module {
            name,
            kind,
            entry,
            file,
            source,
            attributes,
            submodules: Mutex::new(BTreeMap::new()),
            locations: Mutex::new(locations),
        }
    }

    /// Full dotted name, e.g. `codebase_20240131093000.pkg.mod`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last segment of the dotted name.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Whether submodules can be imported from this module.
    pub fn is_package(&self) -> bool {
        !matches!(self.kind, ModuleKind::Module)
    }

    /// Search path entry (archive or directory) the module was found in.
    pub fn search_entry(&self) -> &Path {
        &self.entry
    }

    /// Path of the module's file, e.g. `/tmp/code.zip/pkg/mod.py`.
    ///
    /// Namespace packages have no file.
    pub fn origin(&self) -> Option<PathBuf> {
        self.file.as_ref().map(|file| self.entry.join(file))
    }

    /// Source text, if the module has a file.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Names bound at the top level, excluding submodules.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Whether `name` can be looked up on this module.
    pub fn has_attr(&self, name: &str) -> bool {
        self.getattr(name).is_ok()
    }

    /// Look up a top-level name, then an already imported submodule.
    pub fn getattr(&self, name: &str) -> Result<Value, ImportError> {
        if let Some(value) = self.attributes.get(name) {
            return Ok(value.clone());
        }
        let submodules = self.submodules.lock().unwrap_or_else(|e| e.into_inner());
        match submodules.get(name) {
            Some(module) => Ok(Value::Module(Arc::clone(module))),
            None => Err(ImportError::AttributeNotFound {
                module: self.name.clone(),
                attribute: name.to_string(),
            }),
        }
    }

    /// Where submodules are searched for.
    pub(crate) fn locations(&self) -> Vec<SearchLocation> {
        self.locations.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the portions of a namespace package.
    pub(crate) fn set_locations(&self, locations: Vec<SearchLocation>) {
        *self.locations.lock().unwrap_or_else(|e| e.into_inner()) = locations;
    }

    /// Whether any of this module's code lives in `entry`.
    pub(crate) fn comes_from(&self, entry: &Path) -> bool {
        self.entry == entry || self.locations().iter().any(|l| l.entry == entry)
    }

    pub(crate) fn add_submodule(&self, child: &Arc<Module>) {
        let mut submodules = self.submodules.lock().unwrap_or_else(|e| e.into_inner());
        submodules.insert(child.short_name().to_string(), Arc::clone(child));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_getattr_prefers_attributes() {
        let parent = Module::new(
            "pkg".into(),
            ModuleKind::Package,
            PathBuf::from("/code.zip"),
            Some("pkg/__init__.py".into()),
            Some("mod = 1\n".into()),
            vec![],
        );
        let child = Arc::new(Module::new(
            "pkg.mod".into(),
            ModuleKind::Module,
            PathBuf::from("/code.zip"),
            Some("pkg/mod.py".into()),
            Some("def g():\n    pass\n".into()),
            vec![],
        ));
        let other = Arc::new(Module::new(
            "pkg.other".into(),
            ModuleKind::Module,
            PathBuf::from("/code.zip"),
            Some("pkg/other.py".into()),
            Some(String::new()),
            vec![],
        ));
        parent.add_submodule(&child);
        parent.add_submodule(&other);

        assert!(matches!(parent.getattr("mod").unwrap(), Value::Variable(_)));
        let value = parent.getattr("other").unwrap();
        assert_eq!(value.as_module().unwrap().name(), "pkg.other");
        assert!(matches!(
            parent.getattr("missing"),
            Err(ImportError::AttributeNotFound { .. })
        ));
        assert_eq!(
            parent.origin(),
            Some(PathBuf::from("/code.zip/pkg/__init__.py"))
        );
        assert_eq!(child.short_name(), "mod");
    }
}
