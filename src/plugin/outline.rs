//! Icon outlines.
//!
//! An SVG icon is read into its view box and the path data of every drawn
//! shape. Basic shapes are converted to paths, containers that are never
//! rendered are skipped, and anything else is rejected so that a glyph is
//! never silently missing parts.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::LazyLock;

use anyhow::{Context, bail};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;

static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-+]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][-+]?[0-9]+)?").expect("valid regex")
});

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[MmLlHhVvCcSsQqTtAaZz]|[-+]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][-+]?[0-9]+)?")
        .expect("valid regex")
});

/// Elements whose content is never drawn directly.
const HIDDEN: [&str; 12] = [
    "defs",
    "title",
    "desc",
    "metadata",
    "style",
    "clipPath",
    "mask",
    "symbol",
    "linearGradient",
    "radialGradient",
    "pattern",
    "filter",
];

type Attrs = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ViewBox {
    pub min_x: f64,
    pub min_y: f64,
    pub width: f64,
    pub height: f64,
}

/// The drawable content of an icon.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Outline {
    pub view_box: ViewBox,
    /// Path data of every shape, in document order.
    pub paths: Vec<String>,
}

/// Reads an SVG document into an outline.
pub(crate) fn read_outline(svg: &str) -> anyhow::Result<Outline> {
    let mut reader = Reader::from_str(svg);
    let mut view_box = None;
    let mut paths = Vec::new();
    let mut hidden = 0usize;

    loop {
        let (element, open) = match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) => (e, true),
            Event::Empty(e) => (e, false),
            Event::End(_) => {
                hidden = hidden.saturating_sub(1);
                continue;
            }
            _ => continue,
        };

        if hidden > 0 {
            hidden += usize::from(open);
            continue;
        }

        // Elements of other namespaces (editor metadata and the like).
        if element.name().prefix().is_some() {
            hidden += usize::from(open);
            continue;
        }

        let local = element.local_name();
        let name = std::str::from_utf8(local.as_ref())?;
        if HIDDEN.contains(&name) {
            hidden += usize::from(open);
            continue;
        }

        let attrs = attributes(&element)?;
        if attrs.contains_key("transform") {
            bail!("<{name}> has a transform, flatten it before building the font");
        }

        match name {
            "svg" if view_box.is_some() => bail!("nested <svg> elements aren't supported"),
            "svg" => view_box = Some(view_box_of(&attrs)?),
            _ if view_box.is_none() => bail!("<{name}> outside of the <svg> root"),
            "g" => {}
            "path" => paths.extend(attrs.get("d").filter(|d| !d.trim().is_empty()).cloned()),
            "rect" => paths.extend(rect(&attrs)?),
            "circle" => {
                let r = length_or_zero(&attrs, "r")?;
                paths.extend(ellipse(&attrs, r, r)?);
            }
            "ellipse" => {
                let (rx, ry) = (length_or_zero(&attrs, "rx")?, length_or_zero(&attrs, "ry")?);
                paths.extend(ellipse(&attrs, rx, ry)?);
            }
            "polygon" => paths.extend(poly(&attrs, true)?),
            "polyline" => paths.extend(poly(&attrs, false)?),
            other => bail!("unsupported element <{other}>"),
        }
    }

    let Some(view_box) = view_box else {
        bail!("not an SVG document");
    };
    if view_box.width <= 0.0 || view_box.height <= 0.0 {
        bail!("icon has an empty view box");
    }
    if paths.is_empty() {
        bail!("icon has no drawable shapes");
    }

    Ok(Outline { view_box, paths })
}

fn attributes(element: &BytesStart<'_>) -> anyhow::Result<Attrs> {
    let mut attrs = Attrs::new();
    for attr in element.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        attrs.insert(key, attr.unescape_value()?.into_owned());
    }
    Ok(attrs)
}

fn numbers(value: &str) -> anyhow::Result<Vec<f64>> {
    NUMBER
        .find_iter(value)
        .map(|m| m.as_str().parse::<f64>().with_context(|| format!("bad number '{}'", m.as_str())))
        .collect()
}

fn length(value: &str) -> anyhow::Result<f64> {
    let value = value.trim();
    value
        .strip_suffix("px")
        .unwrap_or(value)
        .parse()
        .with_context(|| format!("unsupported length '{value}'"))
}

fn length_or_zero(attrs: &Attrs, key: &str) -> anyhow::Result<f64> {
    Ok(attrs.get(key).map(|v| length(v)).transpose()?.unwrap_or(0.0))
}

fn view_box_of(attrs: &Attrs) -> anyhow::Result<ViewBox> {
    if let Some(value) = attrs.get("viewBox") {
        let [min_x, min_y, width, height] = numbers(value)?[..] else {
            bail!("malformed viewBox '{value}'");
        };
        return Ok(ViewBox {
            min_x,
            min_y,
            width,
            height,
        });
    }

    match (attrs.get("width"), attrs.get("height")) {
        (Some(width), Some(height)) => Ok(ViewBox {
            min_x: 0.0,
            min_y: 0.0,
            width: length(width)?,
            height: length(height)?,
        }),
        _ => bail!("icon has neither a viewBox nor a width and height"),
    }
}

fn rect(attrs: &Attrs) -> anyhow::Result<Option<String>> {
    let (x, y) = (length_or_zero(attrs, "x")?, length_or_zero(attrs, "y")?);
    let (w, h) = (length_or_zero(attrs, "width")?, length_or_zero(attrs, "height")?);
    if w <= 0.0 || h <= 0.0 {
        return Ok(None);
    }

    let rx = attrs.get("rx").map(|v| length(v)).transpose()?;
    let ry = attrs.get("ry").map(|v| length(v)).transpose()?;
    let (rx, ry) = match (rx, ry) {
        (Some(rx), Some(ry)) => (rx, ry),
        (Some(r), None) | (None, Some(r)) => (r, r),
        (None, None) => (0.0, 0.0),
    };
    let (rx, ry) = (rx.min(w / 2.0), ry.min(h / 2.0));
    let (right, bottom) = (x + w, y + h);

    if rx <= 0.0 || ry <= 0.0 {
        return Ok(Some(format!("M{x} {y}H{right}V{bottom}H{x}Z")));
    }

    let arc = format!("A{rx} {ry} 0 0 1");
    Ok(Some(format!(
        "M{} {y}H{}{arc} {right} {}V{}{arc} {} {bottom}H{}{arc} {x} {}V{}{arc} {} {y}Z",
        x + rx,
        right - rx,
        y + ry,
        bottom - ry,
        right - rx,
        x + rx,
        bottom - ry,
        y + ry,
        x + rx,
    )))
}

fn ellipse(attrs: &Attrs, rx: f64, ry: f64) -> anyhow::Result<Option<String>> {
    if rx <= 0.0 || ry <= 0.0 {
        return Ok(None);
    }

    let (cx, cy) = (length_or_zero(attrs, "cx")?, length_or_zero(attrs, "cy")?);
    let (left, right) = (cx - rx, cx + rx);
    Ok(Some(format!(
        "M{left} {cy}A{rx} {ry} 0 1 0 {right} {cy}A{rx} {ry} 0 1 0 {left} {cy}Z"
    )))
}

fn poly(attrs: &Attrs, closed: bool) -> anyhow::Result<Option<String>> {
    let points = numbers(attrs.get("points").map(String::as_str).unwrap_or_default())?;
    if points.len() % 2 != 0 {
        bail!("odd number of coordinates in points");
    }

    let mut pairs = points.chunks(2);
    let Some(first) = pairs.next() else {
        return Ok(None);
    };

    let mut d = format!("M{} {}", first[0], first[1]);
    for pair in pairs {
        write!(d, "L{} {}", pair[0], pair[1])?;
    }
    if closed {
        d.push('Z');
    }

    Ok(Some(d))
}

/// Maps icon coordinates into font units: scaled to the em square, shifted
/// to the origin and flipped vertically, since font outlines grow upwards.
struct Flip {
    scale: f64,
    min_x: f64,
    min_y: f64,
    em: f64,
}

impl Flip {
    fn x(&self, x: f64) -> f64 {
        (x - self.min_x) * self.scale
    }

    fn y(&self, y: f64) -> f64 {
        self.em - (y - self.min_y) * self.scale
    }

    fn args(&self, cmd: char, args: &[f64]) -> Vec<f64> {
        let relative = cmd.is_ascii_lowercase();
        let point = |x: f64, y: f64| match relative {
            true => [x * self.scale, -y * self.scale],
            false => [self.x(x), self.y(y)],
        };

        match cmd.to_ascii_uppercase() {
            'H' if relative => vec![args[0] * self.scale],
            'H' => vec![self.x(args[0])],
            'V' if relative => vec![-args[0] * self.scale],
            'V' => vec![self.y(args[0])],
            'A' => {
                let [x, y] = point(args[5], args[6]);
                vec![
                    args[0] * self.scale,
                    args[1] * self.scale,
                    -args[2],
                    args[3],
                    1.0 - args[4],
                    x,
                    y,
                ]
            }
            _ => args.chunks(2).flat_map(|pair| point(pair[0], pair[1])).collect(),
        }
    }
}

fn arity(cmd: char) -> usize {
    match cmd.to_ascii_uppercase() {
        'M' | 'L' | 'T' => 2,
        'H' | 'V' => 1,
        'S' | 'Q' => 4,
        'C' => 6,
        'A' => 7,
        _ => 0,
    }
}

fn is_command(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_alphabetic())
}

/// Formats a coordinate with at most three decimals.
pub(crate) fn num(value: f64) -> String {
    let s = format!("{value:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    match s {
        "-0" => "0".into(),
        s => s.into(),
    }
}

/// Rewrites path data from the icon's view box into a glyph outline of
/// height `em`.
pub(crate) fn flip_path(d: &str, view_box: &ViewBox, em: f64) -> anyhow::Result<String> {
    let flip = Flip {
        scale: em / view_box.height,
        min_x: view_box.min_x,
        min_y: view_box.min_y,
        em,
    };

    let mut out = String::with_capacity(d.len());
    let mut tokens = TOKEN.find_iter(d).map(|m| m.as_str()).peekable();
    let mut first = true;

    while let Some(token) = tokens.next() {
        let Some(cmd) = token.chars().next().filter(|_| is_command(token)) else {
            bail!("expected a path command, found '{token}'");
        };

        // A leading moveto is absolute even when written in lowercase. The
        // pairs following it stay relative line-tos.
        let leading_move = first && cmd == 'm';
        first = false;

        out.push(if leading_move { 'M' } else { cmd });
        let arity = arity(cmd);
        if arity == 0 {
            continue;
        }

        let mut repeat = 0;
        loop {
            let mut args = Vec::with_capacity(arity);
            while args.len() < arity {
                match tokens.next_if(|t| !is_command(t)) {
                    Some(t) => args.push(t.parse::<f64>()?),
                    None => break,
                }
            }

            if args.is_empty() && repeat > 0 {
                break;
            }
            if args.len() < arity {
                bail!("'{cmd}' expects {arity} arguments, found {}", args.len());
            }

            let mode = match (leading_move, repeat) {
                (true, 0) => 'M',
                (true, 1) => {
                    out.push('l');
                    cmd
                }
                (_, 0) => cmd,
                _ => {
                    out.push(' ');
                    cmd
                }
            };
            let mapped: Vec<_> = flip.args(mode, &args).into_iter().map(num).collect();
            out.push_str(&mapped.join(" "));
            repeat += 1;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: ViewBox = ViewBox {
        min_x: 0.0,
        min_y: 0.0,
        width: 10.0,
        height: 10.0,
    };

    #[test]
    fn test_flip_path() {
        assert_eq!(flip_path("M0 0L10 10Z", &SQUARE, 10.0).unwrap(), "M0 10L10 0Z");
        assert_eq!(flip_path("m1 2l3 4 1 1", &SQUARE, 10.0).unwrap(), "M1 8l3 -4 1 -1");
        assert_eq!(flip_path("M0 0h5v5", &SQUARE, 20.0).unwrap(), "M0 20h10v-10");
        assert_eq!(
            flip_path("M0,0A5,5,30,0,1,10,10", &SQUARE, 10.0).unwrap(),
            "M0 10A5 5 -30 0 0 10 0"
        );
        assert!(flip_path("M0", &SQUARE, 10.0).is_err());
    }

    #[test]
    fn test_leading_relative_move_keeps_line_tos_relative() {
        // `m1 2 3 4` draws from (1, 2) to (4, 6), same as `M1 2 4 6`.
        assert_eq!(flip_path("m1 2 3 4", &SQUARE, 10.0).unwrap(), "M1 8l3 -4");
        assert_eq!(flip_path("M1 2 4 6", &SQUARE, 10.0).unwrap(), "M1 8 4 4");
        assert_eq!(flip_path("m1 2 3 4 1 1z", &SQUARE, 10.0).unwrap(), "M1 8l3 -4 1 -1z");

        // Later relative movetos are left alone.
        assert_eq!(flip_path("M0 0m1 1 2 2", &SQUARE, 10.0).unwrap(), "M0 10m1 -1 2 -2");
    }

    #[test]
    fn test_view_box_offset() {
        let outline = read_outline(r#"<svg viewBox="-2 4 8 8"><path d="M-2 4"/></svg>"#).unwrap();
        assert_eq!(flip_path(&outline.paths[0], &outline.view_box, 16.0).unwrap(), "M0 16");

        let sized = read_outline(r#"<svg width="24px" height="12"><path d="M0 0"/></svg>"#).unwrap();
        assert_eq!((sized.view_box.width, sized.view_box.height), (24.0, 12.0));
    }

    #[test]
    fn test_basic_shapes() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 10 10">
            <rect x="1" y="1" width="8" height="4"/>
            <circle cx="5" cy="5" r="2"/>
            <ellipse cx="5" cy="5" rx="3" ry="1"/>
            <polygon points="0,0 10,0 5,5"/>
            <polyline points="0 10 5 5"/>
            <rect width="4" height="2" rx="5"/>
            <circle r="0"/>
        </svg>"#;

        let outline = read_outline(svg).unwrap();
        assert_eq!(
            outline.paths,
            vec![
                "M1 1H9V5H1Z",
                "M3 5A2 2 0 1 0 7 5A2 2 0 1 0 3 5Z",
                "M2 5A3 1 0 1 0 8 5A3 1 0 1 0 2 5Z",
                "M0 0L10 0L5 5Z",
                "M0 10L5 5",
                "M2 0H2A2 1 0 0 1 4 1V1A2 1 0 0 1 2 2H2A2 1 0 0 1 0 1V1A2 1 0 0 1 2 0Z",
            ]
        );

        for d in &outline.paths {
            flip_path(d, &outline.view_box, 10.0).unwrap();
        }
    }

    #[test]
    fn test_groups_and_hidden_content() {
        let svg = r##"<?xml version="1.0"?>
            <svg xmlns="http://www.w3.org/2000/svg" xmlns:sodipodi="http://sodipodi.sourceforge.net" viewBox="0 0 10 10">
              <title>home</title>
              <sodipodi:namedview pagecolor="#fff"/>
              <defs><clipPath id="c"><rect width="10" height="10"/></clipPath></defs>
              <g fill="#000"><g><path d="M1 1L2 2Z"/></g></g>
            </svg>"##;

        let outline = read_outline(svg).unwrap();
        assert_eq!(outline.paths, vec!["M1 1L2 2Z"]);
    }

    #[test]
    fn test_rejects_what_it_cannot_draw() {
        let transformed = r#"<svg viewBox="0 0 10 10"><g transform="scale(2)"><path d="M0 0"/></g></svg>"#;
        let err = read_outline(transformed).unwrap_err();
        assert!(err.to_string().contains("transform"));

        let text = r#"<svg viewBox="0 0 10 10"><text>A</text></svg>"#;
        let err = read_outline(text).unwrap_err();
        assert!(err.to_string().contains("<text>"));

        let empty = r#"<svg viewBox="0 0 10 10"><g/></svg>"#;
        assert!(read_outline(empty).unwrap_err().to_string().contains("no drawable shapes"));

        assert!(read_outline("<svg></svg>").is_err());
        assert!(read_outline(r#"<svg viewBox="0 0 10"><path d="M0 0"/></svg>"#).is_err());
    }
}
