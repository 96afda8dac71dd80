//! File loading for the CLI: shape registries and JSON inputs.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;

use crate::shape::Registry;

/// Deserialize with JSON-path context in error messages.
pub fn from_str_with_path<T: DeserializeOwned>(src: &str) -> Result<T, String> {
    let de = &mut serde_json::Deserializer::from_str(src);
    match serde_path_to_error::deserialize::<_, T>(de) {
        Ok(v) => Ok(v),
        Err(err) => {
            let path = err.path().to_string();
            Err(format!("at JSON path {path} → {}", err.into_inner()))
        }
    }
}

/// Load and validate a shape registry from a JSON file.
pub fn load_registry(path: &Path) -> anyhow::Result<Registry> {
    let src = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read registry file {}", path.display()))?;
    let registry: Registry = from_str_with_path(&src)
        .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
    registry
        .validate()
        .with_context(|| format!("registry {} has dangling shape ids", path.display()))?;
    Ok(registry)
}

/// Load one JSON document.
pub fn load_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let src = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&src).with_context(|| format!("failed to parse {}", path.display()))
}

/// Expand a mix of literal paths and glob patterns into concrete paths.
pub fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        // Minimal glob detection for the `glob` crate syntax.
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                // Pattern was explicitly a glob but matched nothing -> surface as an error
                anyhow::bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            // Treat as a literal path
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ShapeId;

    #[test]
    fn deserialization_errors_carry_json_paths() {
        let src = r#"{"shapes": [{"name": "Bad", "kind": {"enumerable": {"element": "oops"}}}]}"#;
        let err = from_str_with_path::<Registry>(src).unwrap_err();
        assert!(err.contains("shapes"), "{err}");
    }

    #[test]
    fn registries_parse_from_json_files() {
        let src = r#"{
            "shapes": [
                {"name": "str", "kind": {"leaf": "str"}},
                {"name": "Names", "kind": {"enumerable": {"element": 0, "strategy": "mutable"}}}
            ]
        }"#;
        let reg: Registry = from_str_with_path(src).unwrap();
        assert!(reg.validate().is_ok());
        assert_eq!(reg.find("Names"), Some(ShapeId(1)));
    }

    #[test]
    fn literal_paths_pass_through_unresolved() {
        let paths = resolve_file_path_patterns(["a.json", "b/c.json"]).unwrap();
        assert_eq!(paths, vec![PathBuf::from("a.json"), PathBuf::from("b/c.json")]);
    }

    #[test]
    fn unmatched_glob_patterns_are_errors() {
        let err = resolve_file_path_patterns(["no_such_dir_zz9/*.json"]).unwrap_err();
        assert!(err.to_string().contains("matched no files"), "{err}");
    }
}
