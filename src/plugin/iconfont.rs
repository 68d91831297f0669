//! Icon fonts.
//!
//! The SVG icons of a directory become the glyphs of an SVG font. Each icon
//! is assigned a code point in the private use area, starting at U+EA01;
//! icons whose file name already carries a `uXXXX-` prefix keep theirs. The
//! font and a SCSS fragment with one class per glyph are written from the
//! same scan.

use std::collections::HashSet;
use std::fs;
use std::sync::{Arc, LazyLock};

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use regex::Regex;
use serde::Serialize;

use crate::asset::{Asset, Dest};
use crate::core::{RunContext, TaskContext};
use crate::error::TransformError;
use crate::fileset::FileSet;
use crate::pipeline::{Outcome, report};
use crate::plugin::outline::{Outline, flip_path, num, read_outline};
use crate::plugin::template::{load_template, render_str};

static PREFIXED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^u([0-9A-Fa-f]{4,6})-(.+)$").expect("valid regex"));

const FONT: &str = r#"<?xml version="1.0" standalone="no"?>
<!DOCTYPE svg PUBLIC "-//W3C//DTD SVG 1.1//EN" "http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd">
<svg xmlns="http://www.w3.org/2000/svg">
<defs>
  <font id="{{ font_name }}" horiz-adv-x="{{ units_per_em }}">
    <font-face font-family="{{ font_name }}" units-per-em="{{ units_per_em }}" ascent="{{ units_per_em }}" descent="0" />
    <missing-glyph horiz-adv-x="0" />
{%- for g in glyphs %}
    <glyph glyph-name="{{ g.name|e }}" unicode="&#x{{ g.unicode }};" horiz-adv-x="{{ g.width }}" d="{{ g.path }}" />
{%- endfor %}
  </font>
</defs>
</svg>
"#;

const FRAGMENT: &str = r#"// Generated from {{ font_name }}.svg, changes will be overwritten.

@font-face {
  font-family: "{{ font_name }}";
  src: url("{{ font_path }}{{ font_name }}.svg#{{ font_name }}") format("svg");
  font-weight: normal;
  font-style: normal;
}

.{{ class_name }}:before {
  font-family: "{{ font_name }}";
  font-style: normal;
  font-weight: normal;
  font-variant: normal;
  text-transform: none;
  line-height: 1;
  -webkit-font-smoothing: antialiased;
  -moz-osx-font-smoothing: grayscale;
}
{% for g in glyphs %}
.{{ class_name }}-{{ g.name }}:before {
  content: "\{{ g.unicode }}";
}
{% endfor %}"#;

/// Where the icon font task reads and writes.
#[derive(Debug, Clone)]
pub struct IconfontOptions {
    /// Directory holding the SVG icons.
    pub source: Utf8PathBuf,
    /// Destination of the font.
    pub font_dest: Utf8PathBuf,
    /// Destination of the SCSS fragment.
    pub fragment_dest: Utf8PathBuf,
    pub font_name: String,
    /// Prefix of the generated classes.
    pub class_name: String,
    /// Font URL relative to the compiled stylesheet.
    pub font_path: String,
    /// Prefix the file names of new icons with their code point.
    pub append_unicode: bool,
    /// First code point handed out.
    pub start: u32,
    /// Custom template for the SCSS fragment.
    pub template: Option<Utf8PathBuf>,
}

impl IconfontOptions {
    pub fn from_context(ctx: &RunContext) -> Self {
        Self {
            source: ctx.src("icons"),
            font_dest: ctx.dest("fonts"),
            fragment_dest: ctx.src("styles/helper"),
            font_name: "iconfont".into(),
            class_name: "if".into(),
            font_path: "../fonts/".into(),
            append_unicode: true,
            start: 0xEA01,
            template: None,
        }
    }
}

/// An icon with its code point assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePoint {
    /// Glyph name, without the code point prefix.
    pub name: String,
    pub code: u32,
    /// Whether the code point was handed out in this run.
    pub assigned: bool,
}

/// Assigns code points to icons given by file stem, keeping the ones encoded
/// in a `uXXXX-` prefix. New code points are handed out in input order,
/// starting at `start` and skipping those already taken.
pub fn assign_code_points<S: AsRef<str>>(stems: &[S], start: u32) -> Vec<CodePoint> {
    let parsed: Vec<_> = stems
        .iter()
        .map(|stem| {
            let stem = stem.as_ref();
            PREFIXED
                .captures(stem)
                .and_then(|caps| {
                    let code = u32::from_str_radix(&caps[1], 16).ok()?;
                    Some((caps[2].to_string(), Some(code)))
                })
                .unwrap_or_else(|| (stem.to_string(), None))
        })
        .collect();

    let mut used: HashSet<u32> = parsed.iter().filter_map(|(_, code)| *code).collect();
    let mut next = start;

    parsed
        .into_iter()
        .map(|(name, code)| match code {
            Some(code) => CodePoint {
                name,
                code,
                assigned: false,
            },
            None => {
                while used.contains(&next) {
                    next += 1;
                }
                used.insert(next);
                CodePoint {
                    name,
                    code: next,
                    assigned: true,
                }
            }
        })
        .collect()
}

/// One glyph of the font.
#[derive(Debug, Clone, Serialize)]
pub struct Glyph {
    pub name: String,
    /// Code point as uppercase hex.
    pub unicode: String,
    /// Advance width in font units.
    pub width: String,
    /// Outline in font units.
    pub path: String,
}

/// The glyphs of a font, shared by the font and fragment writers.
#[derive(Debug, Clone, Serialize)]
pub struct IconFont {
    pub font_name: String,
    pub class_name: String,
    pub font_path: String,
    pub units_per_em: String,
    pub glyphs: Vec<Glyph>,
}

struct Icon {
    source: Utf8PathBuf,
    point: CodePoint,
    outline: Outline,
}

fn read_icon(source: Utf8PathBuf, point: CodePoint) -> anyhow::Result<Icon> {
    let svg = fs::read_to_string(&source)?;
    let outline = read_outline(&svg)?;

    Ok(Icon {
        source,
        point,
        outline,
    })
}

fn build_glyph(icon: &Icon, em: f64) -> anyhow::Result<Glyph> {
    let view_box = &icon.outline.view_box;
    let path = icon
        .outline
        .paths
        .iter()
        .map(|d| flip_path(d, view_box, em))
        .collect::<anyhow::Result<Vec<_>>>()?
        .join("");

    Ok(Glyph {
        name: icon.point.name.clone(),
        unicode: format!("{:X}", icon.point.code),
        width: num(view_box.width * em / view_box.height),
        path,
    })
}

fn prefix_source(icon: &Icon) -> anyhow::Result<Utf8PathBuf> {
    let dir = icon.source.parent().unwrap_or(Utf8Path::new("."));
    let target = dir.join(format!("u{:04X}-{}.svg", icon.point.code, icon.point.name));
    fs::rename(&icon.source, &target).with_context(|| format!("Couldn't rename to {target}"))?;
    Ok(target)
}

/// Runs the icon font pipeline: assign code points, build the glyphs, then
/// write the font and the SCSS fragment in parallel.
pub fn iconfont(_: &TaskContext<'_>, opts: &IconfontOptions) -> anyhow::Result<Outcome> {
    let mut outcome = Outcome::default();

    let entries = FileSet::new([opts.source.join("*.svg")])?.resolve()?;
    if entries.is_empty() {
        tracing::warn!("no icons found in {}", opts.source);
        return Ok(outcome);
    }

    let stems: Vec<_> = entries
        .iter()
        .map(|e| e.path.file_stem().unwrap_or_default())
        .collect();
    let points = assign_code_points(&stems, opts.start);

    let results: Vec<_> = entries
        .into_iter()
        .zip(points)
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(entry, point)| {
            read_icon(entry.path.clone(), point)
                .map_err(|e| TransformError::new(&entry.path, "iconfont", e))
        })
        .collect();

    let mut icons = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(icon) => icons.push(icon),
            Err(err) => outcome.failures.push(report(err)),
        }
    }

    let Some(em) = icons.iter().map(|i| i.outline.view_box.height).reduce(f64::max) else {
        return Ok(outcome);
    };

    let mut glyphs = Vec::with_capacity(icons.len());
    for icon in &icons {
        match build_glyph(icon, em) {
            Ok(glyph) => glyphs.push(glyph),
            Err(e) => {
                outcome
                    .failures
                    .push(report(TransformError::new(&icon.source, "iconfont", e)));
                continue;
            }
        }

        if opts.append_unicode && icon.point.assigned {
            match prefix_source(icon) {
                Ok(target) => tracing::debug!("assigned U+{:04X} to {target}", icon.point.code),
                Err(e) => outcome
                    .failures
                    .push(report(TransformError::new(&icon.source, "rename", e))),
            }
        }
    }

    let font = Arc::new(IconFont {
        font_name: opts.font_name.clone(),
        class_name: opts.class_name.clone(),
        font_path: opts.font_path.clone(),
        units_per_em: num(em),
        glyphs,
    });

    tracing::debug!(glyphs = font.glyphs.len(), "built icon font");

    let (written_font, written_fragment) = rayon::join(
        {
            let font = Arc::clone(&font);
            move || write_font(&font, opts)
        },
        {
            let font = Arc::clone(&font);
            move || write_fragment(&font, opts)
        },
    );

    outcome.merge(written_font?);
    outcome.merge(written_fragment?);

    Ok(outcome)
}

fn write_font(font: &IconFont, opts: &IconfontOptions) -> anyhow::Result<Outcome> {
    let name = format!("{}.svg", opts.font_name);
    let svg = render_str(&name, FONT, font)?;

    let asset = Asset::new(&opts.source, name, svg);
    Ok(Dest::new(&opts.font_dest).write(&asset)?.into())
}

fn write_fragment(font: &IconFont, opts: &IconfontOptions) -> anyhow::Result<Outcome> {
    let name = format!("_{}.scss", opts.font_name);
    let template = load_template(opts.template.as_deref(), FRAGMENT)?;
    let scss = render_str(&name, &template, font)?;

    let asset = Asset::new(&opts.source, name, scss);
    Ok(Dest::new(&opts.fragment_dest).write(&asset)?.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 10"><path d="M0 0L10 0L10 10Z"/></svg>"#;

    #[test]
    fn test_assign_code_points() {
        let points = assign_code_points(&["close", "search", "uEA01-home", "uEA03-user"], 0xEA01);
        let codes: Vec<_> = points.iter().map(|p| (p.name.as_str(), p.code, p.assigned)).collect();

        assert_eq!(
            codes,
            vec![
                ("close", 0xEA02, true),
                ("search", 0xEA04, true),
                ("home", 0xEA01, false),
                ("user", 0xEA03, false),
            ]
        );
    }

    #[test]
    fn test_iconfont_task() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let ctx = RunContext::default().with_roots(root.join("app"), root.join("public"), root.join("vendor"));

        let icons = ctx.src("icons");
        fs::create_dir_all(&icons).unwrap();
        fs::write(icons.join("uEA01-home.svg"), SQUARE).unwrap();
        fs::write(icons.join("search.svg"), SQUARE).unwrap();
        fs::write(icons.join("broken.svg"), "<svg></svg>").unwrap();

        let task = TaskContext {
            ctx: &ctx,
            name: "iconfont",
            span: tracing::Span::none(),
        };
        let outcome = iconfont(&task, &IconfontOptions::from_context(&ctx)).unwrap();

        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].path.ends_with("broken.svg"));

        // `broken` took U+EA02 before failing, so `search` gets U+EA03.
        assert!(icons.join("uEA03-search.svg").exists());
        assert!(!icons.join("search.svg").exists());
        assert!(icons.join("uEA01-home.svg").exists());

        let font = fs::read_to_string(ctx.dest("fonts/iconfont.svg")).unwrap();
        assert!(font.contains(r#"units-per-em="10""#));
        assert!(font.contains(r#"<glyph glyph-name="home" unicode="&#xEA01;" horiz-adv-x="10" d="M0 10L10 10L10 0Z" />"#));
        assert!(font.contains(r#"glyph-name="search" unicode="&#xEA03;""#));

        let scss = fs::read_to_string(ctx.src("styles/helper/_iconfont.scss")).unwrap();
        assert!(scss.contains(r#"url("../fonts/iconfont.svg#iconfont")"#));
        assert!(scss.contains(".if-home:before {\n  content: \"\\EA01\";\n}"));
        assert!(scss.contains(".if-search:before {\n  content: \"\\EA03\";\n}"));
    }

    #[test]
    fn test_shapes_and_escaped_names() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let ctx = RunContext::default().with_roots(root.join("app"), root.join("public"), root.join("vendor"));

        let icons = ctx.src("icons");
        fs::create_dir_all(&icons).unwrap();
        fs::write(
            icons.join("dot&ring.svg"),
            r#"<svg viewBox="0 0 10 10"><g><circle cx="5" cy="5" r="5"/></g></svg>"#,
        )
        .unwrap();
        fs::write(
            icons.join("label.svg"),
            r#"<svg viewBox="0 0 10 10"><rect width="10" height="10"/><text>A</text></svg>"#,
        )
        .unwrap();

        let task = TaskContext {
            ctx: &ctx,
            name: "iconfont",
            span: tracing::Span::none(),
        };
        let opts = IconfontOptions {
            append_unicode: false,
            ..IconfontOptions::from_context(&ctx)
        };
        let outcome = iconfont(&task, &opts).unwrap();

        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].path.ends_with("label.svg"));
        assert!(outcome.failures[0].source.to_string().contains("<text>"));

        let font = fs::read_to_string(ctx.dest("fonts/iconfont.svg")).unwrap();
        assert!(font.contains(r#"glyph-name="dot&amp;ring" unicode="&#xEA01;""#));
        assert!(font.contains(r#"d="M0 5A5 5 0 1 1 10 5A5 5 0 1 1 0 5Z""#));
        assert!(icons.join("dot&ring.svg").exists());
    }
}
