//! ASGI entry points (`module.path:attr`) and their build-time check

use crate::context::SourceTree;
use crate::error::PipelineError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub module: String,
    pub attr: String,
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

impl EntryPoint {
    pub fn parse(input: &str) -> Result<Self, PipelineError> {
        let fail = |reason: &str| PipelineError::entrypoint(input, reason);

        let (module, attr) = input
            .trim()
            .split_once(':')
            .ok_or_else(|| fail("expected 'module:attribute'"))?;

        if module.is_empty() || !module.split('.').all(|part| identifier_re().is_match(part)) {
            return Err(fail("module must be a dotted Python identifier"));
        }
        if !attr.split('.').all(|part| identifier_re().is_match(part)) {
            return Err(fail("attribute must be a Python identifier"));
        }

        Ok(Self {
            module: module.to_string(),
            attr: attr.to_string(),
        })
    }

    /// Files that would satisfy the import, relative to the working directory
    pub fn module_candidates(&self) -> [PathBuf; 2] {
        let base: PathBuf = self.module.split('.').collect();
        [base.with_extension("py"), base.join("__init__.py")]
    }

    /// The name that must be bound at module top level
    fn top_level_name(&self) -> &str {
        self.attr.split('.').next().unwrap_or(&self.attr)
    }

    /// Checks that the module exists in `tree` and, if `check_attr`, that it
    /// binds the attribute at top level. Returns the module file.
    pub fn verify(&self, tree: &SourceTree, check_attr: bool) -> Result<PathBuf, PipelineError> {
        let module_file = self
            .module_candidates()
            .into_iter()
            .find(|candidate| tree.contains_file(candidate))
            .ok_or_else(|| {
                let [file, package] = self.module_candidates();
                PipelineError::entrypoint(
                    self.to_string(),
                    format!(
                        "neither {} nor {} exists in the source tree",
                        file.display(),
                        package.display()
                    ),
                )
            })?;

        if !check_attr {
            return Ok(module_file);
        }

        let source = tree.read_to_string(&module_file)?;
        let bound = top_level_bindings(&source);
        let wanted = self.top_level_name();
        if bound.contains(wanted) {
            return Ok(module_file);
        }

        let mut reason = format!(
            "'{}' is not bound at the top level of {}",
            wanted,
            module_file.display()
        );
        if let Some(suggestion) = closest(wanted, &bound) {
            reason.push_str(&format!(" (did you mean '{}'?)", suggestion));
        }
        Err(PipelineError::entrypoint(self.to_string(), reason))
    }
}

impl FromStr for EntryPoint {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.attr)
    }
}

fn binding_res() -> &'static [Regex; 4] {
    static RES: OnceLock<[Regex; 4]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"^([A-Za-z_]\w*)\s*(?::[^=]+)?=(?:[^=]|$)").expect("valid regex"),
            Regex::new(r"^(?:async\s+)?def\s+([A-Za-z_]\w*)").expect("valid regex"),
            Regex::new(r"^class\s+([A-Za-z_]\w*)").expect("valid regex"),
            Regex::new(r"^((?:[A-Za-z_]\w*\s*,\s*)+[A-Za-z_]\w*)\s*=(?:[^=]|$)")
                .expect("valid regex"),
        ]
    })
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:from\s+\S+\s+)?import\s+(.+)$").expect("valid regex")
    })
}

/// Names bound by unindented statements
fn top_level_bindings(source: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut lines = source.lines();

    while let Some(line) = lines.next() {
        if line.starts_with(char::is_whitespace) || line.starts_with('#') {
            continue;
        }

        if let Some(caps) = import_re().captures(line) {
            let mut list = caps[1].to_string();
            if list.trim_start().starts_with('(') && !list.contains(')') {
                for next in lines.by_ref() {
                    list.push(',');
                    list.push_str(next);
                    if next.contains(')') {
                        break;
                    }
                }
            }
            let is_from = line.starts_with("from");
            for item in list
                .split(|c: char| c == ',' || c == '(' || c == ')')
                .map(|item| item.split('#').next().unwrap_or("").trim())
                .filter(|item| !item.is_empty())
            {
                let name = match item.split_once(" as ") {
                    Some((_, alias)) => alias.trim(),
                    None if is_from => item,
                    None => item.split('.').next().unwrap_or(item),
                };
                names.insert(name.to_string());
            }
            continue;
        }

        let [assign, def, class, tuple] = binding_res();
        for re in [assign, def, class] {
            if let Some(caps) = re.captures(line) {
                names.insert(caps[1].to_string());
            }
        }
        if let Some(caps) = tuple.captures(line) {
            for name in caps[1].split(',') {
                names.insert(name.trim().to_string());
            }
        }
    }

    names
}

fn closest<'a>(wanted: &str, candidates: &'a BTreeSet<String>) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (strsim::jaro_winkler(wanted, c), c))
        .filter(|(score, _)| *score >= 0.8)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, c)| c.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;
    use yare::parameterized;

    fn tree(files: &[(&str, &str)]) -> (TempDir, SourceTree) {
        let dir = TempDir::new().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let tree = SourceTree::scan(dir.path()).unwrap();
        (dir, tree)
    }

    #[parameterized(
        default = { "main:app", "main", "app" },
        dotted = { "service.api:application", "service.api", "application" },
        nested_attr = { "main:factory.app", "main", "factory.app" },
    )]
    fn test_parse(input: &str, module: &str, attr: &str) {
        let ep = EntryPoint::parse(input).unwrap();
        assert_eq!(ep.module, module);
        assert_eq!(ep.attr, attr);
        assert_eq!(ep.to_string(), input);
    }

    #[parameterized(
        no_colon = { "main" },
        empty_module = { ":app" },
        empty_attr = { "main:" },
        dashed = { "my-app:app" },
        path_like = { "src/main:app" },
    )]
    fn test_parse_invalid(input: &str) {
        let err = EntryPoint::parse(input).unwrap_err();
        assert_eq!(err.exit_code(), 15);
    }

    #[test]
    fn test_module_candidates() {
        let ep = EntryPoint::parse("service.api:app").unwrap();
        let [file, package] = ep.module_candidates();
        assert_eq!(file, Path::new("service/api.py"));
        assert_eq!(package, Path::new("service/api/__init__.py"));
    }

    #[test]
    fn test_verify_assignment() {
        let (_dir, tree) = tree(&[(
            "main.py",
            "from fastapi import FastAPI\n\napp = FastAPI()\n\n@app.get('/')\nasync def root():\n    return {}\n",
        )]);
        let ep = EntryPoint::parse("main:app").unwrap();
        assert_eq!(ep.verify(&tree, true).unwrap(), Path::new("main.py"));
    }

    #[test]
    fn test_verify_package_module() {
        let (_dir, tree) = tree(&[("api/__init__.py", "from .factory import create_app as app\n")]);
        let ep = EntryPoint::parse("api:app").unwrap();
        assert_eq!(ep.verify(&tree, true).unwrap(), Path::new("api/__init__.py"));
    }

    #[test]
    fn test_missing_module() {
        let (_dir, tree) = tree(&[("app.py", "app = 1\n")]);
        let err = EntryPoint::parse("main:app").unwrap().verify(&tree, true).unwrap_err();
        match err {
            PipelineError::EntryPointNotFound { reason, .. } => {
                assert!(reason.contains("main.py"), "{}", reason)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_attribute_suggests() {
        let (_dir, tree) = tree(&[("main.py", "from fastapi import FastAPI\napi = FastAPI()\n")]);
        let ep = EntryPoint::parse("main:apii").unwrap();
        match ep.verify(&tree, true).unwrap_err() {
            PipelineError::EntryPointNotFound { reason, .. } => {
                assert!(reason.contains("did you mean 'api'"), "{}", reason)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_indented_binding_does_not_count() {
        let (_dir, tree) = tree(&[("main.py", "def build():\n    app = 1\n    return app\n")]);
        let ep = EntryPoint::parse("main:app").unwrap();
        assert!(ep.verify(&tree, true).is_err());
        assert!(ep.verify(&tree, false).is_ok());
    }

    #[test]
    fn test_top_level_bindings() {
        let source = "\
import os, sys as system
import a.b.c
from x import (
    one,
    two as deux,  # trailing comment
)
from y import z
CONST: int = 3
left, right = 1, 2
value == 3
async def handler(): pass
class Service:
    inner = 1
";
        let names = top_level_bindings(source);
        for expected in [
            "os", "system", "a", "one", "deux", "z", "CONST", "left", "right", "handler",
            "Service",
        ] {
            assert!(names.contains(expected), "missing {}", expected);
        }
        assert!(!names.contains("value"));
        assert!(!names.contains("inner"));
    }
}
