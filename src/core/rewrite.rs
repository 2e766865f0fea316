//! Textual import rewriting.
//!
//! Rewrites `import <lib> `, `import <lib>.` and `from <lib>.` occurrences to
//! point at a new qualified name. This is a pattern-based transform, not a
//! parser: aliased re-exports, dynamic imports (`importlib.import_module`),
//! module names embedded in strings, relative imports, bare `from <lib> import`
//! and an `import <lib>` directly followed by a newline are left untouched.

use std::collections::HashMap;

const IMPORT: &str = "import ";
const FROM: &str = "from ";

/// Rewrites import statements from old library names to qualified names.
#[derive(Debug, Clone, Default)]
pub struct ImportRewriter {
    mapping: HashMap<String, String>,
}

impl ImportRewriter {
    /// Create a rewriter from an explicit `old -> new` mapping.
    pub fn new(mapping: HashMap<String, String>) -> Self {
        ImportRewriter { mapping }
    }

    /// Create a rewriter mapping every library `lib` to `<prefix>.<lib>`.
    pub fn with_prefix<'a>(libraries: impl IntoIterator<Item = &'a String>, prefix: &str) -> Self {
        let mapping = libraries
            .into_iter()
            .map(|lib| (lib.clone(), format!("{}.{}", prefix, lib)))
            .collect();
        ImportRewriter { mapping }
    }

    /// Number of libraries this rewriter knows about.
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Rewrite `text` in a single left-to-right pass.
    ///
    /// Replaced text is never rescanned, so a rewritten `import ns.a.` cannot
    /// be rewritten again by a library called `ns`.
    pub fn rewrite(&self, text: &str) -> String {
        if self.mapping.is_empty() {
            return text.to_string();
        }

        let mut candidates: Vec<(usize, &str)> = text
            .match_indices(IMPORT)
            .chain(text.match_indices(FROM))
            .collect();
        candidates.sort_unstable_by_key(|(start, _)| *start);

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;

        for (start, keyword) in candidates {
            if start < cursor {
                continue;
            }
            let name_start = start + keyword.len();
            let tail = &text[name_start..];

            let Some(end) = tail.find(|c: char| c == '.' || c.is_whitespace()) else {
                continue;
            };
            // `from <lib> ` is not a rewrite pattern; only `from <lib>.` is.
            let delimiter = tail.as_bytes()[end];
            let accepted = delimiter == b'.' || (delimiter == b' ' && keyword == IMPORT);
            if !accepted {
                continue;
            }

            let Some(replacement) = self.mapping.get(&tail[..end]) else {
                continue;
            };

            out.push_str(&text[cursor..name_start]);
            out.push_str(replacement);
            cursor = name_start + end;
        }

        out.push_str(&text[cursor..]);
        out
    }
}

/// Convenience wrapper: rewrite `text` with an explicit mapping.
pub fn rewrite(text: &str, old_to_new: &HashMap<String, String>) -> String {
    ImportRewriter::new(old_to_new.clone()).rewrite(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter(pairs: &[(&str, &str)]) -> ImportRewriter {
        ImportRewriter::new(
            pairs
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_rewrite_dotted_import() {
        let r = rewriter(&[("foo", "ns.foo")]);
        assert_eq!(r.rewrite("import foo.bar"), "import ns.foo.bar");
    }

    #[test]
    fn test_rewrite_leaves_longer_names_alone() {
        let r = rewriter(&[("foo", "ns.foo")]);
        assert_eq!(r.rewrite("import foobar"), "import foobar");
        assert_eq!(r.rewrite("import foo2 as f"), "import foo2 as f");
        assert_eq!(r.rewrite("from foo2.x import y"), "from foo2.x import y");
    }

    #[test]
    fn test_rewrite_similar_library_names() {
        let r = rewriter(&[("foo", "ns.foo"), ("foo2", "ns.foo2")]);
        let src = "import foo as a\nimport foo2 as b\nfrom foo2.x import y\nfrom foo.z import w\n";
        assert_eq!(
            r.rewrite(src),
            "import ns.foo as a\nimport ns.foo2 as b\nfrom ns.foo2.x import y\nfrom ns.foo.z import w\n"
        );
    }

    #[test]
    fn test_rewrite_patterns() {
        let r = rewriter(&[("pkg", "p.pkg")]);
        assert_eq!(r.rewrite("import pkg as k"), "import p.pkg as k");
        assert_eq!(r.rewrite("from pkg.mod import f"), "from p.pkg.mod import f");
        // Not covered by the three patterns.
        assert_eq!(r.rewrite("from pkg import mod"), "from pkg import mod");
        assert_eq!(r.rewrite("import pkg\n"), "import pkg\n");
    }

    #[test]
    fn test_rewrite_is_not_rescanned() {
        let r = rewriter(&[("a", "ns.a"), ("ns", "other.ns")]);
        assert_eq!(r.rewrite("import a.b"), "import ns.a.b");
        assert_eq!(r.rewrite("import ns.x"), "import other.ns.x");
    }

    #[test]
    fn test_rewrite_order_independent() {
        let libs: Vec<String> = vec!["alpha".into(), "beta".into(), "al".into()];
        let forward = ImportRewriter::with_prefix(libs.iter(), "p");
        let backward = ImportRewriter::with_prefix(libs.iter().rev(), "p");
        let src = "import alpha.x\nimport al.y\nfrom beta.z import q\nimport alphabet.q\n";
        assert_eq!(forward.rewrite(src), backward.rewrite(src));
        assert_eq!(
            forward.rewrite(src),
            "import p.alpha.x\nimport p.al.y\nfrom p.beta.z import q\nimport alphabet.q\n"
        );
    }

    #[test]
    fn test_rewrite_non_ascii_text() {
        let r = rewriter(&[("lib", "ns.lib")]);
        let src = "# ünïcode ☃\nimport lib.core  # ✓\n";
        assert_eq!(r.rewrite(src), "# ünïcode ☃\nimport ns.lib.core  # ✓\n");
    }

    #[test]
    fn test_rewrite_function_wrapper() {
        let mut mapping = HashMap::new();
        mapping.insert("foo".to_string(), "ns.foo".to_string());
        assert_eq!(rewrite("import foo ", &mapping), "import ns.foo ");
    }
}
