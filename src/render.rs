//! Turns a template's content plus an entry into a command.
//!
//! Templates are Jinja-style (`{{ entry.name }}`) and rendered with strict
//! undefined handling, so a reference to a field the entry does not have is
//! an error instead of an empty string. Compiled templates are cached in the
//! renderer, keyed by the SHA-256 of their content.

use std::collections::HashMap;
use std::sync::RwLock;

use minijinja::{Environment, ErrorKind, UndefinedBehavior, context};
use sha2::{Digest, Sha256};

use crate::error::RenderError;
use crate::model::Entry;

/// Attributes of `entry` visible to templates.
const ENTRY_FIELDS: [&str; 3] = ["id", "name", "created_at"];

/// Global functions minijinja provides without any context.
const BUILTIN_GLOBALS: [&str; 4] = ["range", "dict", "debug", "namespace"];

/// Hex SHA-256 of a template's content.
pub fn cache_key(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

enum Lookup {
    Hit,
    Miss,
    Collision,
}

/// Renders template content against entries, compiling each distinct
/// content once.
pub struct TemplateRenderer {
    env: RwLock<Environment<'static>>,
    /// cache key -> content it was compiled from.
    sources: RwLock<HashMap<String, String>>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            env: RwLock::new(strict_environment()),
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Render `content` for `entry`. Identical inputs always give identical output.
    pub fn render(&self, content: &str, entry: &Entry) -> Result<String, RenderError> {
        let key = cache_key(content);

        match self.lookup(&key, content) {
            Lookup::Hit => {}
            Lookup::Miss => self.compile(&key, content)?,
            Lookup::Collision => {
                tracing::warn!(key = %key, "Template cache key collision, rendering uncached");
                let env = strict_environment();
                let template = env
                    .template_from_str(content)
                    .map_err(|e| RenderError::Syntax(e.to_string()))?;
                return render_template(&template, entry);
            }
        }

        let env = self.env.read().unwrap_or_else(|e| e.into_inner());
        let template = env
            .get_template(&key)
            .map_err(|e| RenderError::Syntax(e.to_string()))?;
        render_template(&template, entry)
    }

    /// Number of distinct contents compiled so far.
    pub fn cached_templates(&self) -> usize {
        self.sources.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lookup(&self, key: &str, content: &str) -> Lookup {
        let sources = self.sources.read().unwrap_or_else(|e| e.into_inner());
        match sources.get(key) {
            Some(cached) if cached == content => Lookup::Hit,
            Some(_) => Lookup::Collision,
            None => Lookup::Miss,
        }
    }

    fn compile(&self, key: &str, content: &str) -> Result<(), RenderError> {
        let mut env = self.env.write().unwrap_or_else(|e| e.into_inner());
        env.add_template_owned(key.to_string(), content.to_string())
            .map_err(|e| RenderError::Syntax(e.to_string()))?;
        self.sources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), content.to_string());
        tracing::debug!(key = %key, "Compiled template");
        Ok(())
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn strict_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

fn render_template(
    template: &minijinja::Template<'_, '_>,
    entry: &Entry,
) -> Result<String, RenderError> {
    let mut referenced: Vec<String> = template.undeclared_variables(true).into_iter().collect();
    referenced.sort();
    for path in &referenced {
        let mut segments = path.split('.');
        let root = segments.next().unwrap_or(path.as_str());
        if BUILTIN_GLOBALS.contains(&root) {
            continue;
        }
        if root != "entry" {
            return Err(RenderError::UnknownField {
                field: root.to_string(),
            });
        }
        if let Some(field) = segments.next()
            && !ENTRY_FIELDS.contains(&field)
        {
            return Err(RenderError::UnknownField {
                field: field.to_string(),
            });
        }
    }

    template
        .render(context! { entry => entry })
        .map_err(|e| match e.kind() {
            // Attribute lookups below a known field, e.g. `entry.name.x`.
            ErrorKind::UndefinedError => RenderError::UnknownField {
                field: referenced
                    .iter()
                    .find(|p| p.matches('.').count() >= 2)
                    .cloned()
                    .or_else(|| e.detail().map(String::from))
                    .unwrap_or_else(|| "undefined value".to_string()),
            },
            ErrorKind::SyntaxError => RenderError::Syntax(e.to_string()),
            _ => RenderError::Evaluation(e.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(name: &str) -> Entry {
        Entry {
            id: 7,
            name: name.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn renders_entry_fields() {
        let renderer = TemplateRenderer::new();
        let cmd = renderer
            .render("bsub -J {{ entry.name }}-{{ entry.id }} run.sh {{ entry.name }}", &entry("SRR1"))
            .unwrap();
        assert_eq!(cmd, "bsub -J SRR1-7 run.sh SRR1");
    }

    #[test]
    fn rendering_is_deterministic() {
        let renderer = TemplateRenderer::new();
        let content = "echo {{ entry.name | upper }} {{ entry.created_at }}";
        let first = renderer.render(content, &entry("abc")).unwrap();
        let second = renderer.render(content, &entry("abc")).unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("echo ABC 2024-03-01"));
    }

    #[test]
    fn unknown_field_is_named() {
        let renderer = TemplateRenderer::new();
        let err = renderer
            .render("echo {{ entry.accession }}", &entry("abc"))
            .unwrap_err();
        assert_eq!(
            err,
            RenderError::UnknownField {
                field: "accession".to_string()
            }
        );
    }

    #[test]
    fn unknown_top_level_variable_fails() {
        let renderer = TemplateRenderer::new();
        let err = renderer.render("echo {{ sample }}", &entry("abc")).unwrap_err();
        assert_eq!(
            err,
            RenderError::UnknownField {
                field: "sample".to_string()
            }
        );
    }

    #[test]
    fn builtin_globals_are_allowed() {
        let renderer = TemplateRenderer::new();
        let cmd = renderer
            .render("{% for i in range(2) %}run {{ entry.name }}.{{ i }};{% endfor %}", &entry("s"))
            .unwrap();
        assert_eq!(cmd, "run s.0;run s.1;");
    }

    #[test]
    fn nested_lookup_on_field_names_the_path() {
        let renderer = TemplateRenderer::new();
        let err = renderer
            .render("echo {{ entry.name.accession }}", &entry("abc"))
            .unwrap_err();
        assert_eq!(
            err,
            RenderError::UnknownField {
                field: "entry.name.accession".to_string()
            }
        );
    }

    #[test]
    fn syntax_error_is_reported_and_not_cached() {
        let renderer = TemplateRenderer::new();
        let err = renderer.render("echo {{ entry.name", &entry("abc")).unwrap_err();
        assert!(matches!(err, RenderError::Syntax(_)));
        assert_eq!(renderer.cached_templates(), 0);
    }

    #[test]
    fn one_compilation_per_distinct_content() {
        let renderer = TemplateRenderer::new();
        for name in ["a", "b", "c"] {
            renderer.render("echo {{ entry.name }}", &entry(name)).unwrap();
        }
        assert_eq!(renderer.cached_templates(), 1);

        let other = renderer.render("run {{ entry.name }}", &entry("a")).unwrap();
        assert_eq!(other, "run a");
        assert_eq!(renderer.cached_templates(), 2);
    }

    #[test]
    fn plain_text_passes_through() {
        let renderer = TemplateRenderer::new();
        assert_eq!(renderer.render("exit 3", &entry("a")).unwrap(), "exit 3");
    }

    #[test]
    fn cache_key_is_content_hash() {
        assert_eq!(cache_key("x"), cache_key("x"));
        assert_ne!(cache_key("x"), cache_key("y"));
        assert_eq!(
            cache_key(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
