//! Runtime dependency detection for code payloads.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Standard-library modules that never need installing.
const STDLIB: &[&str] = &[
    "__future__", "abc", "argparse", "array", "ast", "asyncio", "base64", "bisect", "builtins",
    "bz2", "calendar", "cmath", "codecs", "collections", "concurrent", "contextlib", "copy",
    "csv", "ctypes", "dataclasses", "datetime", "decimal", "difflib", "email", "enum", "errno",
    "fnmatch", "fractions", "functools", "gc", "getpass", "glob", "gzip", "hashlib", "heapq",
    "hmac", "html", "http", "io", "itertools", "json", "logging", "lzma", "math", "mimetypes",
    "multiprocessing", "numbers", "operator", "os", "pathlib", "pickle", "platform", "pprint",
    "queue", "random", "re", "secrets", "shutil", "signal", "socket", "sqlite3", "statistics",
    "string", "struct", "subprocess", "sys", "tempfile", "textwrap", "threading", "time",
    "timeit", "traceback", "types", "typing", "unicodedata", "unittest", "urllib", "uuid",
    "warnings", "weakref", "xml", "zipfile", "zlib",
];

/// Import names whose installable package is named differently.
const ALIASES: &[(&str, &str)] = &[
    ("cv2", "opencv-python"),
    ("PIL", "Pillow"),
    ("sklearn", "scikit-learn"),
    ("skimage", "scikit-image"),
    ("yaml", "PyYAML"),
    ("bs4", "beautifulsoup4"),
    ("dateutil", "python-dateutil"),
    ("dotenv", "python-dotenv"),
    ("Crypto", "pycryptodome"),
    ("docx", "python-docx"),
    ("fitz", "PyMuPDF"),
    ("serial", "pyserial"),
    ("jwt", "PyJWT"),
    ("magic", "python-magic"),
];

fn import_patterns() -> &'static (Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        (
            Regex::new(r"^\s*import\s+(.+)$").unwrap(),
            Regex::new(r"^\s*from\s+(\S+)\s+import\b").unwrap(),
        )
    })
}

/// Detect third-party packages a payload imports.
///
/// Scans line by line for `import x` and `from x import y`, drops standard
/// library and relative imports, maps import names to package names, and
/// returns the result sorted without duplicates.
pub fn detect_dependencies(code: &str) -> Vec<String> {
    let (import_re, from_re) = import_patterns();
    let mut found = BTreeSet::new();

    for line in code.lines() {
        let line = line.split('#').next().unwrap_or_default();

        if let Some(caps) = from_re.captures(line) {
            add_module(&caps[1], &mut found);
        } else if let Some(caps) = import_re.captures(line) {
            for part in caps[1].split(',') {
                if let Some(name) = part.split_whitespace().next() {
                    add_module(name, &mut found);
                }
            }
        }
    }

    found.into_iter().collect()
}

fn add_module(path: &str, found: &mut BTreeSet<String>) {
    if path.starts_with('.') {
        return;
    }
    let root = path.split('.').next().unwrap_or(path);
    if root.is_empty() || STDLIB.contains(&root) {
        return;
    }
    let package = ALIASES
        .iter()
        .find(|(name, _)| *name == root)
        .map(|(_, package)| *package)
        .unwrap_or(root);
    found.insert(package.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_third_party_imports() {
        let code = "import pandas as pd\nimport numpy\nfrom sklearn.linear_model import LinearRegression\n";
        assert_eq!(
            detect_dependencies(code),
            vec!["numpy".to_string(), "pandas".to_string(), "scikit-learn".to_string()]
        );
    }

    #[test]
    fn test_stdlib_and_relative_filtered() {
        let code = "import os, json\nfrom collections import OrderedDict\nfrom . import utils\nfrom .models import User\n";
        assert!(detect_dependencies(code).is_empty());
    }

    #[test]
    fn test_aliases_mapped_and_deduplicated() {
        let code = "import cv2\nfrom PIL import Image\nimport cv2\nimport requests\n";
        assert_eq!(
            detect_dependencies(code),
            vec!["Pillow".to_string(), "opencv-python".to_string(), "requests".to_string()]
        );
    }

    #[test]
    fn test_indented_and_commented_imports() {
        let code = "def f():\n    import torch  # lazy\n    return torch\n# import tensorflow\n";
        assert_eq!(detect_dependencies(code), vec!["torch".to_string()]);
    }
}
