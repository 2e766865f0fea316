//! End-to-end tests: build an archive from a tree, namespace it, mount it and
//! import from it.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use codesave::core::archive::{entry_names, ArchiveInfo};
use codesave::core::entrypoint::Launcher;
use codesave::core::filter::{Filter, Filters, IgnoreFilter};
use codesave::core::library::discover;
use codesave::loader::{Codebase, Importer, ModuleResolver, UniqueCodebase, UniqueOptions};
use codesave::ops::{
    create_archive, make_executable, namespace, run_archive, NamespaceOptions, SaveInput,
    SaveOptions,
};

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Archive the contents of `root` (not `root` itself) at `output`.
fn archive_tree(root: &Path, output: &Path) -> PathBuf {
    let mut inputs: Vec<SaveInput> = fs::read_dir(root)
        .unwrap()
        .map(|e| SaveInput::new(e.unwrap().path()))
        .collect();
    inputs.sort_by(|a, b| a.path.cmp(&b.path));
    create_archive(&inputs, output, &SaveOptions::default()).unwrap();
    output.to_path_buf()
}

fn sample_tree(tmp: &Path) -> PathBuf {
    let root = tmp.join("src");
    write(&root.join("a.py"), "from b.c import helper\nimport b.c \n\nA = helper()\n");
    write(&root.join("b/c.py"), "def helper():\n    return 3\n");
    write(&root.join("pkg/__init__.py"), "");
    write(&root.join("pkg/mod.py"), "def f():\n    return 1\n");
    write(&root.join("README.md"), "docs\n");
    root
}

#[test]
fn test_discover_file_and_directory_libraries() {
    let tmp = TempDir::new().unwrap();
    write(&tmp.path().join("a.py"), "");
    write(&tmp.path().join("b/c.py"), "");
    write(&tmp.path().join("data/raw.csv"), "1,2\n");

    let names = discover(tmp.path()).unwrap();
    let expected: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
    assert_eq!(names, expected);
}

#[test]
fn test_namespace_mount_and_import() {
    let tmp = TempDir::new().unwrap();
    let root = sample_tree(tmp.path());
    let plain = archive_tree(&root, &tmp.path().join("plain.zip"));
    let namespaced = tmp.path().join("ns1.zip");

    namespace(&plain, &namespaced, &NamespaceOptions::default().with_prefix("ns1")).unwrap();

    let info = ArchiveInfo::read(&namespaced).unwrap();
    assert_eq!(info.prefix.as_deref(), Some("ns1"));
    assert!(info.library_names.contains("pkg"));

    let resolver = ModuleResolver::new();
    let opts = UniqueOptions {
        make_unique: false,
        prefix: None,
    };
    let codebase = UniqueCodebase::open_with(&resolver, &namespaced, &opts).unwrap();

    let module = codebase.import_module("pkg.mod").unwrap();
    assert_eq!(module.name(), "ns1.pkg.mod");
    assert!(module.getattr("f").unwrap().is_callable());

    let a = codebase.import_module("a").unwrap();
    let source = a.source().unwrap();
    assert!(source.contains("from ns1.b.c import helper"));
    assert!(source.contains("import ns1.b.c "));
    assert!(codebase.from_import("b.c", "helper").unwrap().is_callable());
}

#[test]
fn test_same_archive_loaded_twice() {
    let tmp = TempDir::new().unwrap();
    let root = sample_tree(tmp.path());
    let plain = archive_tree(&root, &tmp.path().join("plain.zip"));
    let resolver = ModuleResolver::new();

    let first = UniqueCodebase::open_with(&resolver, &plain, &UniqueOptions::default()).unwrap();
    let second = UniqueCodebase::open_with(&resolver, &plain, &UniqueOptions::default()).unwrap();

    let a1 = first.import_module("a").unwrap();
    let a2 = second.import_module("a").unwrap();
    assert!(!Arc::ptr_eq(&a1, &a2));
    assert_ne!(a1.name(), a2.name());
    assert_eq!(resolver.search_path().len(), 2);
}

#[test]
fn test_mount_close_leaves_search_path_unchanged() {
    let tmp = TempDir::new().unwrap();
    let root = sample_tree(tmp.path());
    let plain = archive_tree(&root, &tmp.path().join("plain.zip"));

    let resolver = ModuleResolver::with_search_path(vec![PathBuf::from("/usr/lib/python3/site")]);
    let before = resolver.search_path();

    let mut codebase = Codebase::open_with(&resolver, &plain).unwrap();
    let module = codebase.import_module("pkg.mod").unwrap();
    codebase.close().unwrap();

    assert_eq!(resolver.search_path(), before);
    // Values imported before closing stay usable.
    assert!(module.getattr("f").unwrap().is_callable());
}

#[test]
fn test_from_import_sees_reexports_and_tuple_bindings() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("src");
    write(
        &root.join("lib/__init__.py"),
        "from lib.routines import (\n    checkpoint,\n    restore,\n)\n",
    );
    write(
        &root.join("lib/routines.py"),
        "def checkpoint():\n    pass\n\ndef restore():\n    pass\n",
    );
    write(
        &root.join("m.py"),
        "a, b = 1, 2\ntry:\n    import json\nexcept ImportError:\n    json = None\n",
    );
    let plain = archive_tree(&root, &tmp.path().join("plain.zip"));

    let resolver = ModuleResolver::new();
    let codebase = UniqueCodebase::open_with(&resolver, &plain, &UniqueOptions::default()).unwrap();

    let lib = codebase.import_module("lib").unwrap();
    let names: Vec<&str> = lib.attribute_names().collect();
    assert_eq!(names, vec!["checkpoint", "restore"]);
    assert!(lib
        .source()
        .unwrap()
        .contains(&format!("from {}.lib.routines import (", codebase.prefix())));

    // Found as attributes of the package, not as submodules.
    let values = codebase.from_import_many("lib", &["checkpoint", "restore"]).unwrap();
    assert!(values.iter().all(|v| v.as_module().is_none()));
    assert!(codebase.from_import("m", "a").is_ok());
    assert!(codebase.from_import("m", "b").is_ok());
    assert!(codebase.from_import("m", "json").is_ok());
}

#[test]
fn test_package_markers_have_no_gaps() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("src");
    write(&root.join("deep/a/b/c/leaf.py"), "X = 1\n");
    write(&root.join("other/x.py"), "import deep.a.b.c.leaf \n");
    let plain = archive_tree(&root, &tmp.path().join("plain.zip"));
    let namespaced = tmp.path().join("ns.zip");

    namespace(&plain, &namespaced, &NamespaceOptions::default().with_prefix("ns")).unwrap();

    let names = entry_names(&namespaced).unwrap();
    let set: BTreeSet<&str> = names.iter().map(String::as_str).collect();
    for name in names.iter().filter(|n| n.ends_with(".py")) {
        let parts: Vec<&str> = name.split('/').collect();
        for depth in 1..parts.len() {
            let dir = parts[..depth].join("/");
            let covered = set.contains(format!("{}/__init__.py", dir).as_str())
                || depth == parts.len() - 1;
            assert!(covered, "{} has no marker above {}", dir, name);
        }
    }

    let resolver = ModuleResolver::new();
    let opts = UniqueOptions {
        make_unique: false,
        prefix: None,
    };
    let codebase = UniqueCodebase::open_with(&resolver, &namespaced, &opts).unwrap();
    assert!(codebase.import_module("deep.a.b.c.leaf").unwrap().has_attr("X"));
}

#[test]
fn test_size_filter_keeps_small_file() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("files");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("small.dat"), vec![0u8; 500]).unwrap();
    fs::write(root.join("large.dat"), vec![0u8; 2000]).unwrap();

    let filter: Arc<dyn IgnoreFilter> =
        Arc::new(Filters::new().with(Filter::larger_than("1k").unwrap()));
    let output = tmp.path().join("out.zip");
    create_archive(
        &[SaveInput::new(&root).with_filter(filter)],
        &output,
        &SaveOptions::default(),
    )
    .unwrap();

    let names = entry_names(&output).unwrap();
    assert!(names.contains(&"files/small.dat".to_string()));
    assert!(!names.contains(&"files/large.dat".to_string()));
}

#[test]
fn test_module_entry_point_runs_once() {
    if which::which("python3").is_err() && which::which("python").is_err() {
        return;
    }
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("src");
    write(&root.join("pkg/__init__.py"), "");
    write(
        &root.join("pkg/mod.py"),
        "import sys\nsys.stdout.write('side-effect\\n')\n",
    );
    let archive = archive_tree(&root, &tmp.path().join("app.pyz"));

    make_executable(&archive, &Launcher::Module("pkg.mod".into())).unwrap();
    let output = run_archive::<&str>(&archive, &[], None).unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("side-effect").count(), 1);
}
