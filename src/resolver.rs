// Template Parameter Resolver
//
// Base template plus per-job override documents, loaded once at startup so
// resolution is a pure in-memory lookup.

use anyhow::{Context, Result};
use lelot::ParameterResolver;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Resolves a job's payload by merging its override onto a base template
///
/// A job without an override gets the base as is; with neither, it is unresolved.
#[derive(Debug, Clone, Default)]
pub struct TemplateResolver {
    base: Option<Value>,
    overrides: HashMap<String, Value>,
}

impl TemplateResolver {
    /// Build a resolver from in-memory documents
    pub fn new(base: Option<Value>, overrides: HashMap<String, Value>) -> Self {
        Self { base, overrides }
    }

    /// Load the base template and every `<job_id>.json` in `overrides_dir`
    ///
    /// # Arguments
    ///
    /// * `template` - Base template document
    /// * `overrides_dir` - Directory of per-job overrides (non-recursive)
    ///
    /// # Returns
    ///
    /// `Result<TemplateResolver>` - Resolver, or the first read/parse failure
    pub fn load(template: Option<&Path>, overrides_dir: Option<&Path>) -> Result<Self> {
        let base = template.map(read_json).transpose()?;

        let mut overrides = HashMap::new();
        if let Some(dir) = overrides_dir {
            for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
                let entry = entry
                    .with_context(|| format!("Failed to read overrides directory: {:?}", dir))?;
                let path = entry.path();

                let is_json = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("json"))
                    .unwrap_or(false);
                if !entry.file_type().is_file() || !is_json {
                    continue;
                }

                if let Some(job_id) = path.file_stem().and_then(|s| s.to_str()) {
                    debug!(job = job_id, path = %path.display(), "loaded parameter override");
                    overrides.insert(job_id.to_string(), read_json(path)?);
                }
            }
        }

        info!(
            template = base.is_some(),
            overrides = overrides.len(),
            "parameter resolver ready"
        );
        Ok(Self { base, overrides })
    }

    /// Number of per-job overrides
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }
}

impl ParameterResolver for TemplateResolver {
    fn resolve(&self, job_id: &str) -> Option<Value> {
        match (self.base.as_ref(), self.overrides.get(job_id)) {
            (None, None) => None,
            (Some(base), None) => Some(base.clone()),
            (base, Some(patch)) => {
                let mut merged = base.cloned().unwrap_or_else(|| Value::Object(Map::new()));
                merge_json(&mut merged, patch);
                Some(merged)
            }
        }
    }
}

/// Deep-merge `patch` onto `target`.
///
/// Objects merge key by key, recursively; any other value replaces.
pub fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read parameter file: {:?}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse parameter file: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_merge_json() {
        let mut base = json!({
            "layers": {"walls": "A-WALL", "doors": "A-DOOR"},
            "tolerance": 0.1,
            "checks": ["overlap"]
        });
        merge_json(
            &mut base,
            &json!({
                "layers": {"doors": "A-DOOR-NEW", "glazing": "A-GLAZ"},
                "checks": ["gaps"]
            }),
        );

        assert_eq!(
            base,
            json!({
                "layers": {"walls": "A-WALL", "doors": "A-DOOR-NEW", "glazing": "A-GLAZ"},
                "tolerance": 0.1,
                "checks": ["gaps"]
            })
        );
    }

    #[test]
    fn test_merge_replaces_non_objects() {
        let mut base = json!({"a": {"b": 1}});
        merge_json(&mut base, &json!({"a": 5}));
        assert_eq!(base, json!({"a": 5}));
    }

    #[test]
    fn test_resolve_merges_override_or_uses_base() {
        let resolver = TemplateResolver::new(
            Some(json!({"profile": "base", "strict": false})),
            HashMap::from([("plan-01".to_string(), json!({"strict": true}))]),
        );

        assert_eq!(
            resolver.resolve("plan-01"),
            Some(json!({"profile": "base", "strict": true}))
        );
        assert_eq!(
            resolver.resolve("plan-02"),
            Some(json!({"profile": "base", "strict": false}))
        );
    }

    #[test]
    fn test_resolve_without_base_or_override() {
        let resolver = TemplateResolver::new(
            None,
            HashMap::from([("a".to_string(), json!({"x": 1}))]),
        );
        assert_eq!(resolver.resolve("b"), None);
        assert_eq!(TemplateResolver::default().resolve("a"), None);
    }

    #[test]
    fn test_resolve_without_base() {
        let resolver = TemplateResolver::new(
            None,
            HashMap::from([("a".to_string(), json!({"x": 1}))]),
        );
        assert_eq!(resolver.resolve("a"), Some(json!({"x": 1})));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = TempDir::new().unwrap();
        let template = dir.path().join("base.json");
        fs::write(&template, r#"{"profile": "base"}"#).unwrap();
        let overrides = dir.path().join("overrides");
        fs::create_dir(&overrides).unwrap();
        fs::write(overrides.join("plan-01.json"), r#"{"layer": "A-WALL"}"#).unwrap();
        fs::write(overrides.join("README.txt"), "ignored").unwrap();

        let resolver = TemplateResolver::load(Some(&template), Some(&overrides)).unwrap();
        assert_eq!(resolver.override_count(), 1);
        assert_eq!(
            resolver.resolve("plan-01"),
            Some(json!({"profile": "base", "layer": "A-WALL"}))
        );
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let dir = TempDir::new().unwrap();
        let template = dir.path().join("base.json");
        fs::write(&template, "{ not json").unwrap();
        assert!(TemplateResolver::load(Some(&template), None).is_err());
    }
}
