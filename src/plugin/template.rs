use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use minijinja::Environment;
use serde::Serialize;

/// Renders a template source with `minijinja`. The name is used in error
/// messages and decides auto-escaping (`.html` templates are escaped).
pub fn render_str(name: &str, source: &str, ctx: impl Serialize) -> anyhow::Result<String> {
    let env = Environment::new();
    let template = env.template_from_named_str(name, source)?;
    Ok(template.render(ctx)?)
}

/// Reads a template file and renders it with key/value bindings.
pub fn render_file(
    path: &Utf8Path,
    data: &BTreeMap<String, serde_json::Value>,
) -> anyhow::Result<String> {
    let source = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Couldn't read template '{path}': {e}"))?;

    render_str(path.file_name().unwrap_or(path.as_str()), &source, data)
}

/// Parses a `KEY=VALUE` binding. Values that parse as JSON (numbers, booleans,
/// arrays, objects) keep their type, anything else is a string.
pub fn parse_binding(binding: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = binding
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{binding}'"))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{binding}'"));
    }

    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));

    Ok((key.to_string(), value))
}

/// The template at `path` if one was given, the built-in one otherwise.
pub(crate) fn load_template(
    path: Option<&Utf8Path>,
    default: &'static str,
) -> std::io::Result<Cow<'static, str>> {
    match path {
        Some(path) => Ok(Cow::Owned(fs::read_to_string(path)?)),
        None => Ok(Cow::Borrowed(default)),
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn test_parse_binding() {
        assert_eq!(parse_binding("foo=1").unwrap(), ("foo".into(), serde_json::json!(1)));
        assert_eq!(
            parse_binding("title=Hello world").unwrap(),
            ("title".into(), serde_json::json!("Hello world"))
        );
        assert_eq!(parse_binding("url=a=b").unwrap().1, serde_json::json!("a=b"));
        assert!(parse_binding("nothing").is_err());
        assert!(parse_binding("=1").is_err());
    }

    #[test]
    fn test_render_file_escapes_html() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let path = root.join("index.html");
        fs::write(&path, "<p>{{ foo }}</p>{% if n > 1 %}many{% endif %}").unwrap();

        let data = BTreeMap::from([
            parse_binding("foo=<b>").unwrap(),
            parse_binding("n=2").unwrap(),
        ]);

        assert_eq!(render_file(&path, &data).unwrap(), "<p>&lt;b&gt;</p>many");
    }

    #[test]
    fn test_render_error() {
        assert!(render_str("x.txt", "{% if %}", ()).is_err());
    }
}
