//! Top-level binding scanner for Python source.
//!
//! Finds the names a module binds when it runs: `def`, `class`, imports and
//! assignments at module scope. Module scope includes the bodies of
//! top-level `if`, `try`, `with` and loop blocks, but not of `def` or
//! `class`. String literals and comments are blanked out first, and
//! bracketed or backslash-continued lines are joined into one logical line
//! before matching.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::loader::module::Value;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global",
    "if", "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return",
    "try", "while", "with", "yield",
];

struct Patterns {
    /// String literals (triple-quoted first) and comments
    noise: Regex,
    /// A header that opens a new scope
    scope: Regex,
    def: Regex,
    class: Regex,
    import: Regex,
    from_import: Regex,
    /// `name` or `name as alias` inside an import list
    binding: Regex,
    /// `a`, `a, b`, `(a, *b)` or `[a, b]` on the left of `=`
    target: Regex,
    ident: Regex,
}

static PATTERNS: LazyLock<Patterns> = LazyLock::new(|| Patterns {
    noise: Regex::new(
        r##"(?s)"""(?:[^\\]|\\.)*?"""|'''(?:[^\\]|\\.)*?'''|"(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'|#[^\n]*"##,
    )
    .unwrap(),
    scope: Regex::new(r"^(?:async\s+)?(?:def|class)\b").unwrap(),
    def: Regex::new(r"^(?:async\s+)?def\s+([A-Za-z_]\w*)").unwrap(),
    class: Regex::new(r"^class\s+([A-Za-z_]\w*)").unwrap(),
    import: Regex::new(r"^import\s+(.+)$").unwrap(),
    from_import: Regex::new(r"^from\s+[\w.]+\s+import\s+(.+)$").unwrap(),
    binding: Regex::new(r"^([A-Za-z_][\w.]*)(?:\s+as\s+([A-Za-z_]\w*))?$").unwrap(),
    target: Regex::new(
        r"^[(\[]?\s*\*?[A-Za-z_]\w*(?:\s*,\s*\*?[A-Za-z_]\w*)*\s*,?\s*[)\]]?$",
    )
    .unwrap(),
    ident: Regex::new(r"[A-Za-z_]\w*").unwrap(),
});

/// Read the names a module binds at its top level.
pub(crate) fn scan_attributes(source: &str) -> BTreeMap<String, Value> {
    let patterns = &*PATTERNS;
    let text = patterns.noise.replace_all(source, |caps: &Captures| {
        if caps[0].starts_with('#') {
            ""
        } else {
            "\"\""
        }
    });

    let mut attributes = BTreeMap::new();
    // Open blocks as (indent, opens a def/class scope)
    let mut blocks: Vec<(usize, bool)> = Vec::new();

    for (indent, line) in logical_lines(&text) {
        while blocks.last().is_some_and(|&(open, _)| open >= indent) {
            blocks.pop();
        }
        let in_scope = blocks.iter().any(|&(_, scope)| scope);
        if line.ends_with(':') {
            blocks.push((indent, patterns.scope.is_match(&line)));
        }
        if in_scope || line.starts_with('@') {
            continue;
        }
        for statement in line.split(';') {
            bind_statement(statement.trim(), &mut attributes);
        }
    }
    attributes
}

fn bind_statement(statement: &str, attributes: &mut BTreeMap<String, Value>) {
    let patterns = &*PATTERNS;

    if let Some(caps) = patterns.def.captures(statement) {
        let name = caps[1].to_string();
        attributes.insert(name.clone(), Value::Function(name));
    } else if let Some(caps) = patterns.class.captures(statement) {
        let name = caps[1].to_string();
        attributes.insert(name.clone(), Value::Class(name));
    } else if let Some(caps) = patterns.import.captures(statement) {
        for name in import_bindings(&caps[1]) {
            attributes.insert(name.clone(), Value::Variable(name));
        }
    } else if let Some(caps) = patterns.from_import.captures(statement) {
        for name in from_import_bindings(&caps[1]) {
            attributes.insert(name.clone(), Value::Variable(name));
        }
    } else {
        for name in assignment_targets(statement) {
            attributes.insert(name.clone(), Value::Variable(name));
        }
    }
}

/// Join continued physical lines, returning each logical line with the
/// indent of its first physical line.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut indent = 0;
    let mut depth = 0usize;

    for raw in text.lines() {
        let raw = raw.trim_end();
        let (line, continued) = match raw.strip_suffix('\\') {
            Some(head) => (head, true),
            None => (raw, false),
        };
        if current.is_empty() {
            if line.trim().is_empty() {
                continue;
            }
            indent = line.len() - line.trim_start().len();
        } else {
            current.push(' ');
        }
        current.push_str(line.trim());

        for c in line.chars() {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
        if depth == 0 && !continued {
            lines.push((indent, std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        lines.push((indent, current));
    }
    lines
}

/// `import a.b, c as d` binds `a` and `d`.
fn import_bindings(list: &str) -> Vec<String> {
    list.split(',')
        .filter_map(|part| {
            let caps = PATTERNS.binding.captures(part.trim())?;
            match caps.get(2) {
                Some(alias) => Some(alias.as_str().to_string()),
                None => caps[1].split('.').next().map(str::to_string),
            }
        })
        .collect()
}

/// `from m import (a, b as c,)` binds `a` and `c`.
fn from_import_bindings(list: &str) -> Vec<String> {
    let list = list.trim();
    let list = list
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(list);

    list.split(',')
        .filter_map(|part| {
            let caps = PATTERNS.binding.captures(part.trim())?;
            match caps.get(2) {
                Some(alias) => Some(alias.as_str().to_string()),
                None if !caps[1].contains('.') => Some(caps[1].to_string()),
                None => None,
            }
        })
        .collect()
}

/// Names bound by `a = b = 1`, `a, b = 1, 2` or `x: int = 0`.
fn assignment_targets(statement: &str) -> Vec<String> {
    let segments = split_assignment(statement);
    let Some((_, targets)) = segments.split_last() else {
        return Vec::new();
    };

    targets
        .iter()
        .flat_map(|target| {
            let target = strip_annotation(target).trim();
            if !PATTERNS.target.is_match(target) {
                return Vec::new();
            }
            PATTERNS
                .ident
                .find_iter(target)
                .map(|m| m.as_str())
                .filter(|name| !KEYWORDS.contains(name))
                .map(str::to_string)
                .collect()
        })
        .collect()
}

/// Split on every bracket-level `=` that is an assignment, leaving
/// comparisons, augmented assignments and `:=` alone.
fn split_assignment(statement: &str) -> Vec<&str> {
    let bytes = statement.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'=' if depth == 0 => {
                let prev = if i > 0 { bytes[i - 1] } else { 0 };
                let next = bytes.get(i + 1).copied().unwrap_or(0);
                if next != b'=' && !b"=!<>:+-*/%&|^@".contains(&prev) {
                    parts.push(&statement[start..i]);
                    start = i + 1;
                }
            }
            _ => {}
        }
    }
    parts.push(&statement[start..]);
    parts
}

fn strip_annotation(target: &str) -> &str {
    match target.split_once(':') {
        Some((name, _)) => name,
        None => target,
    }
}
