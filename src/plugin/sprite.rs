//! Sprite sheets.
//!
//! Every PNG in `sprite/2x` is downscaled into `sprite/1x`, the images of a
//! density are packed into a single composite, and the composite is written
//! together with a SCSS fragment describing where each sprite sits. Both
//! outputs are produced from one packing pass.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use image::{DynamicImage, RgbaImage, imageops};
use serde::Serialize;

use crate::asset::{Asset, Dest};
use crate::core::{RunContext, TaskContext};
use crate::error::TransformError;
use crate::fileset::FileSet;
use crate::pipeline::{Chain, Outcome, Step, report};
use crate::plugin::image::{ImageMin, Resize};
use crate::plugin::template::{load_template, render_str};

const TEMPLATE: &str = r#"// Generated from {{ image_url }}, changes will be overwritten.
{% for s in sprites %}
${{ s.name }}-name: '{{ s.name }}';
${{ s.name }}-x: {{ s.x }}px;
${{ s.name }}-y: {{ s.y }}px;
${{ s.name }}-offset-x: {{ s.offset_x }}px;
${{ s.name }}-offset-y: {{ s.offset_y }}px;
${{ s.name }}-width: {{ s.width }}px;
${{ s.name }}-height: {{ s.height }}px;
${{ s.name }}-total-width: {{ width }}px;
${{ s.name }}-total-height: {{ height }}px;
${{ s.name }}-image: '{{ image_url }}';
${{ s.name }}: ({{ s.x }}px, {{ s.y }}px, {{ s.offset_x }}px, {{ s.offset_y }}px, {{ s.width }}px, {{ s.height }}px, {{ width }}px, {{ height }}px, '{{ image_url }}', '{{ s.name }}', );
{%- endfor %}
{% if retina %}
{% for s in retina.sprites %}
${{ s.name }}-2x: ({{ s.x }}px, {{ s.y }}px, {{ s.offset_x }}px, {{ s.offset_y }}px, {{ s.width }}px, {{ s.height }}px, {{ retina.width }}px, {{ retina.height }}px, '{{ retina.image_url }}', '{{ s.name }}-2x', );
{%- endfor %}
{% endif %}
$spritesheet-sprites: ({% for s in sprites %}${{ s.name }}, {% endfor %});
$spritesheet: ({{ width }}px, {{ height }}px, '{{ image_url }}', $spritesheet-sprites, );

@mixin sprite-width($sprite) {
  width: nth($sprite, 5);
}

@mixin sprite-height($sprite) {
  height: nth($sprite, 6);
}

@mixin sprite-position($sprite) {
  background-position: nth($sprite, 3) nth($sprite, 4);
}

@mixin sprite-image($sprite) {
  background-image: url(nth($sprite, 9));
}

@mixin sprite($sprite) {
  @include sprite-image($sprite);
  @include sprite-position($sprite);
  @include sprite-width($sprite);
  @include sprite-height($sprite);
}

@mixin sprites($sprites) {
  @each $sprite in $sprites {
    .#{nth($sprite, 10)} {
      @include sprite($sprite);
    }
  }
}
{% if retina %}
@mixin retina-sprite($sprite, $sprite2x) {
  @include sprite($sprite);

  @media (-webkit-min-device-pixel-ratio: 2), (min-resolution: 192dpi) {
    background-image: url(nth($sprite2x, 9));
    background-size: nth($sprite, 7) nth($sprite, 8);
  }
}
{% endif %}
"#;

/// Where the sprite task reads and writes.
#[derive(Debug, Clone)]
pub struct SpriteOptions {
    /// Directory holding the `2x` and `1x` source directories.
    pub source: Utf8PathBuf,
    /// Destination of the composite images.
    pub image_dest: Utf8PathBuf,
    /// Destination of the SCSS fragment.
    pub fragment_dest: Utf8PathBuf,
    /// Public URL of the directory holding the composite images.
    pub url: String,
    /// Base name of the composite image.
    pub name: String,
    /// File name of the SCSS fragment.
    pub fragment: String,
    /// Also pack the `2x` images into a retina composite.
    pub retina: bool,
    /// Optimization level of the composite images.
    pub level: u8,
    /// Custom template for the SCSS fragment.
    pub template: Option<Utf8PathBuf>,
}

impl SpriteOptions {
    pub fn from_context(ctx: &RunContext) -> Self {
        Self {
            source: ctx.src("images/sprite"),
            image_dest: ctx.dest("images"),
            fragment_dest: ctx.src("styles/helper"),
            url: "/images/".into(),
            name: "sprite".into(),
            fragment: "_sprite.scss".into(),
            retina: false,
            level: 5,
            template: None,
        }
    }

    fn image_name(&self, retina: bool) -> String {
        match retina {
            true => format!("{}2x.png", self.name),
            false => format!("{}.png", self.name),
        }
    }
}

/// One packed image.
#[derive(Debug, Clone, Serialize)]
pub struct Sprite {
    pub name: String,
    pub x: u32,
    pub y: u32,
    pub offset_x: i64,
    pub offset_y: i64,
    pub width: u32,
    pub height: u32,
}

/// A composite image and the position of every sprite in it.
#[derive(Debug, Clone, Serialize)]
pub struct SpriteSheet {
    #[serde(skip)]
    pub image: RgbaImage,
    /// Public URL of the composite.
    pub image_url: String,
    #[serde(skip)]
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    pub sprites: Vec<Sprite>,
}

#[derive(Serialize)]
struct Sheets {
    #[serde(flatten)]
    normal: SpriteSheet,
    retina: Option<SpriteSheet>,
}

/// Runs the whole sprite pipeline: downscale, pack, then write the
/// composites and the SCSS fragment in parallel.
pub fn sprite(ctx: &TaskContext<'_>, opts: &SpriteOptions) -> anyhow::Result<Outcome> {
    let dir_2x = opts.source.join("2x");
    let dir_1x = opts.source.join("1x");
    let mut outcome = Outcome::default();

    let stale = FileSet::new([dir_2x.join("*.png")])?.changed(&dir_1x);
    let downscale = ctx.chain(&Chain::new().step(Step::each(Resize::half())));
    outcome.merge(downscale.run(&stale, &dir_1x)?);

    let Some(normal) = pack_dir(&dir_1x, opts, false, &mut outcome.failures)? else {
        tracing::warn!("no sprites found in {dir_1x}");
        return Ok(outcome);
    };

    let retina = match opts.retina {
        true => pack_dir(&dir_2x, opts, true, &mut outcome.failures)?,
        false => None,
    };

    tracing::debug!(
        sprites = normal.sprites.len(),
        width = normal.width,
        height = normal.height,
        "packed sprite sheet"
    );

    let sheets = Arc::new(Sheets { normal, retina });

    let (images, fragment) = rayon::join(
        {
            let sheets = Arc::clone(&sheets);
            move || write_images(&sheets, opts)
        },
        {
            let sheets = Arc::clone(&sheets);
            move || write_fragment(&sheets, opts)
        },
    );

    outcome.merge(images?);
    outcome.merge(fragment?);

    Ok(outcome)
}

fn pack_dir(
    dir: &Utf8Path,
    opts: &SpriteOptions,
    retina: bool,
    failures: &mut Vec<TransformError>,
) -> anyhow::Result<Option<SpriteSheet>> {
    let mut images = Vec::new();

    for entry in FileSet::new([dir.join("*.png")])?.resolve()? {
        match image::open(&entry.path) {
            Ok(image) => {
                let name = sprite_name(entry.path.file_stem().unwrap_or_default());
                images.push((name, image.to_rgba8()));
            }
            Err(e) => failures.push(report(TransformError::new(&entry.path, "sprite", e))),
        }
    }

    if images.is_empty() {
        return Ok(None);
    }

    let file_name = opts.image_name(retina);
    let image_url = format!("{}{}", opts.url, file_name);

    Ok(Some(compose(&images, file_name, image_url)))
}

/// Packs images into one composite.
pub fn compose(images: &[(String, RgbaImage)], file_name: String, image_url: String) -> SpriteSheet {
    let sizes: Vec<_> = images.iter().map(|(_, i)| (i.width(), i.height())).collect();
    let packed = pack(&sizes);

    let mut canvas = RgbaImage::new(packed.width, packed.height);
    let mut sprites = Vec::with_capacity(images.len());

    for ((name, image), &(x, y)) in images.iter().zip(&packed.positions) {
        imageops::overlay(&mut canvas, image, x as i64, y as i64);
        sprites.push(Sprite {
            name: name.clone(),
            x,
            y,
            offset_x: -(x as i64),
            offset_y: -(y as i64),
            width: image.width(),
            height: image.height(),
        });
    }

    SpriteSheet {
        image: canvas,
        image_url,
        file_name,
        width: packed.width,
        height: packed.height,
        sprites,
    }
}

fn write_images(sheets: &Sheets, opts: &SpriteOptions) -> anyhow::Result<Outcome> {
    let dest = Dest::new(&opts.image_dest);
    let optimizer = ImageMin::new(opts.level);
    let mut written = Vec::new();

    for sheet in std::iter::once(&sheets.normal).chain(&sheets.retina) {
        let data = optimizer.optimize_png(&DynamicImage::ImageRgba8(sheet.image.clone()))?;
        let asset = Asset::new(&opts.source, &sheet.file_name, data);
        written.extend(dest.write(&asset)?);
    }

    Ok(written.into())
}

fn write_fragment(sheets: &Sheets, opts: &SpriteOptions) -> anyhow::Result<Outcome> {
    let template = load_template(opts.template.as_deref(), TEMPLATE)?;
    let scss = render_str(&opts.fragment, &template, sheets)?;

    let asset = Asset::new(&opts.source, &opts.fragment, scss);
    Ok(Dest::new(&opts.fragment_dest).write(&asset)?.into())
}

fn sprite_name(stem: &str) -> String {
    stem.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '-',
        })
        .collect()
}

/// Positions of packed rectangles, in input order, and the size of the
/// bounding box.
#[derive(Debug)]
pub(crate) struct Packed {
    pub width: u32,
    pub height: u32,
    pub positions: Vec<(u32, u32)>,
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    used: bool,
    right: Option<usize>,
    down: Option<usize>,
}

impl Cell {
    fn free(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            used: false,
            right: None,
            down: None,
        }
    }
}

/// Binary tree packer which grows its canvas to the right or downwards,
/// whichever keeps it closer to a square.
struct Packer {
    cells: Vec<Cell>,
    root: usize,
}

impl Packer {
    fn new(w: u32, h: u32) -> Self {
        Self {
            cells: vec![Cell::free(0, 0, w, h)],
            root: 0,
        }
    }

    fn push(&mut self, cell: Cell) -> usize {
        self.cells.push(cell);
        self.cells.len() - 1
    }

    fn find(&self, at: usize, w: u32, h: u32) -> Option<usize> {
        let cell = self.cells[at];

        if cell.used {
            cell.right
                .and_then(|right| self.find(right, w, h))
                .or_else(|| cell.down.and_then(|down| self.find(down, w, h)))
        } else if w <= cell.w && h <= cell.h {
            Some(at)
        } else {
            None
        }
    }

    fn split(&mut self, at: usize, w: u32, h: u32) -> (u32, u32) {
        let Cell { x, y, w: cw, h: ch, .. } = self.cells[at];

        let down = self.push(Cell::free(x, y + h, cw, ch - h));
        let right = self.push(Cell::free(x + w, y, cw - w, h));

        let cell = &mut self.cells[at];
        cell.used = true;
        cell.down = Some(down);
        cell.right = Some(right);

        (x, y)
    }

    fn grow(&mut self, w: u32, h: u32) -> (u32, u32) {
        let root = self.cells[self.root];

        let can_down = w <= root.w;
        let can_right = h <= root.h;
        let should_right = can_right && root.h >= root.w + w;
        let should_down = can_down && root.w >= root.h + h;

        let right = should_right || (!should_down && can_right);

        let (extension, new_root) = if right {
            let height = root.h.max(h);
            let extension = self.push(Cell::free(root.w, 0, w, height));
            let new_root = Cell {
                right: Some(extension),
                down: Some(self.root),
                ..Cell::free(0, 0, root.w + w, height)
            };
            (extension, new_root)
        } else {
            let width = root.w.max(w);
            let extension = self.push(Cell::free(0, root.h, width, h));
            let new_root = Cell {
                right: Some(self.root),
                down: Some(extension),
                ..Cell::free(0, 0, width, root.h + h)
            };
            (extension, new_root)
        };

        self.root = self.push(Cell {
            used: true,
            ..new_root
        });

        // The extension is sized for this block.
        self.split(extension, w, h)
    }

    fn insert(&mut self, w: u32, h: u32) -> (u32, u32) {
        match self.find(self.root, w, h) {
            Some(at) => self.split(at, w, h),
            None => self.grow(w, h),
        }
    }
}

pub(crate) fn pack(sizes: &[(u32, u32)]) -> Packed {
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by_key(|&i| {
        let (w, h) = sizes[i];
        std::cmp::Reverse((w.max(h), w as u64 * h as u64))
    });

    let Some(&first) = order.first() else {
        return Packed {
            width: 0,
            height: 0,
            positions: Vec::new(),
        };
    };

    let (w, h) = sizes[first];
    let mut packer = Packer::new(w, h);
    let mut positions = vec![(0, 0); sizes.len()];

    for i in order {
        let (w, h) = sizes[i];
        positions[i] = packer.insert(w, h);
    }

    let width = positions
        .iter()
        .zip(sizes)
        .map(|(&(x, _), &(w, _))| x + w)
        .max()
        .unwrap_or(0);
    let height = positions
        .iter()
        .zip(sizes)
        .map(|(&(_, y), &(_, h))| y + h)
        .max()
        .unwrap_or(0);

    Packed {
        width,
        height,
        positions,
    }
}
