//! Template Expander (spec §4.B).
//!
//! Placeholders take the form `{{expr}}` where `expr` is one of:
//!
//! - a bare dotted path or `$.path` — resolved against the value passed to
//!   [`expand`]
//! - `$input.path` — resolved against the step's input via [`ScopeResolver`]
//! - `$org.path` / `$project.path` / `$personal.path` — resolved against the
//!   tenant-scoped variable stores via [`ScopeResolver`]
//!
//! A string that is *exactly* one placeholder (nothing before or after)
//! expands to the resolved JSON value with its original type intact — a
//! `{{$.count}}` placeholder over `{"count": 3}` yields the number `3`, not
//! the string `"3"`. A placeholder embedded in a larger string is always
//! stringified in place.

use super::path_condition::resolve;
use serde_json::Value;

/// Resolves the scoped placeholder forms a bare path expression cannot reach
/// on its own. Implemented by the execution context, which owns the
/// tenant/org/project/personal variable stores.
pub trait ScopeResolver {
    fn resolve_input(&self, path: &str) -> Option<Value>;
    fn resolve_org(&self, path: &str) -> Option<Value>;
    fn resolve_project(&self, path: &str) -> Option<Value>;
    fn resolve_personal(&self, path: &str) -> Option<Value>;
}

/// A resolver with nothing behind the scoped placeholders; scoped
/// placeholders resolve to `null`. Useful for tests and for expanding
/// templates that only reference the local data value.
pub struct NullScopeResolver;

impl ScopeResolver for NullScopeResolver {
    fn resolve_input(&self, _path: &str) -> Option<Value> {
        None
    }
    fn resolve_org(&self, _path: &str) -> Option<Value> {
        None
    }
    fn resolve_project(&self, _path: &str) -> Option<Value> {
        None
    }
    fn resolve_personal(&self, _path: &str) -> Option<Value> {
        None
    }
}

/// Expand every `{{...}}` placeholder in `value`, recursing into arrays and
/// objects. Non-string leaves are returned unchanged.
pub fn expand(value: &Value, data: &Value, scopes: &dyn ScopeResolver) -> Value {
    match value {
        Value::String(s) => expand_string(s, data, scopes),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand(v, data, scopes)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand(v, data, scopes)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn expand_string(s: &str, data: &Value, scopes: &dyn ScopeResolver) -> Value {
    if let Some(inner) = whole_placeholder(s) {
        return resolve_placeholder(inner, data, scopes).unwrap_or(Value::Null);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let inner = &after[..end];
                let resolved = resolve_placeholder(inner, data, scopes).unwrap_or(Value::Null);
                out.push_str(&stringify(&resolved));
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

/// Returns the inner expression if `s` is exactly one `{{...}}` placeholder
/// with nothing before or after it.
fn whole_placeholder(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner)
}

fn resolve_placeholder(expr: &str, data: &Value, scopes: &dyn ScopeResolver) -> Option<Value> {
    let trimmed = expr.trim();

    if let Some(path) = trimmed.strip_prefix("$input.") {
        return scopes.resolve_input(path);
    }
    if let Some(path) = trimmed.strip_prefix("$org.") {
        return scopes.resolve_org(path);
    }
    if let Some(path) = trimmed.strip_prefix("$project.") {
        return scopes.resolve_project(path);
    }
    if let Some(path) = trimmed.strip_prefix("$personal.") {
        return scopes.resolve_personal(path);
    }

    resolve(trimmed, data).ok()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whole_value_placeholder_preserves_type() {
        let data = json!({"count": 3});
        let expanded = expand(&json!("{{$.count}}"), &data, &NullScopeResolver);
        assert_eq!(expanded, json!(3));
    }

    #[test]
    fn embedded_placeholder_stringifies() {
        let data = json!({"count": 3});
        let expanded = expand(&json!("total: {{$.count}} items"), &data, &NullScopeResolver);
        assert_eq!(expanded, json!("total: 3 items"));
    }

    #[test]
    fn scoped_placeholders_delegate_to_resolver() {
        struct Fixed;
        impl ScopeResolver for Fixed {
            fn resolve_input(&self, path: &str) -> Option<Value> {
                (path == "name").then(|| json!("alice"))
            }
            fn resolve_org(&self, _path: &str) -> Option<Value> {
                None
            }
            fn resolve_project(&self, _path: &str) -> Option<Value> {
                None
            }
            fn resolve_personal(&self, _path: &str) -> Option<Value> {
                None
            }
        }
        let expanded = expand(&json!("hello {{$input.name}}"), &json!({}), &Fixed);
        assert_eq!(expanded, json!("hello alice"));
    }

    #[test]
    fn recurses_into_arrays_and_objects() {
        let data = json!({"x": 1});
        let template = json!({"a": ["{{$.x}}", "plain"], "b": "{{$.x}}"});
        let expanded = expand(&template, &data, &NullScopeResolver);
        assert_eq!(expanded, json!({"a": [1, "plain"], "b": 1}));
    }

    #[test]
    fn missing_field_resolves_to_null() {
        let expanded = expand(&json!("{{$.missing}}"), &json!({}), &NullScopeResolver);
        assert_eq!(expanded, Value::Null);
    }
}
