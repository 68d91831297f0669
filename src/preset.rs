//! The front-end asset preset.
//!
//! Sources live under `src` (`./app` by default), third-party packages under
//! `vendor` (`./bower_components`) and everything is built into `dest`
//! (`./public`). The default task is `build`.

use crate::blueprint::Blueprint;
use crate::core::{Env, TaskContext};
use crate::engine::{Flow, Task};
use crate::error::GraphError;
use crate::fileset::FileSet;
use crate::io;
use crate::pipeline::{Chain, Outcome, Step};
use crate::plugin::{
    IconfontOptions, ImageMin, MinifyCss, Sass, SpriteOptions, Tool, iconfont, sprite,
};
use crate::transform::{Concat, Rename, SelectorLimit, Size, SourceMaps};

/// Sass load paths inside the vendor tree.
const SASS_PATHS: [&str; 4] = [
    "normalize-scss",
    "bourbon/dist",
    "susy/sass",
    "breakpoint-sass/stylesheets",
];

/// Old IE ignores every selector past this count in a single stylesheet.
const SELECTOR_LIMIT: usize = 2000;

/// Name of the task run when none is given.
pub const DEFAULT_TASK: &str = "build";

/// Switches of the preset.
#[derive(Debug, Clone)]
pub struct Preset {
    /// Also build a `2x` sprite composite for high density screens.
    pub retina: bool,
    /// Prefix new icon sources with their code point.
    pub append_unicode: bool,
    /// Compiler turning CoffeeScript into JavaScript.
    pub coffee: Tool,
    /// Minifier for production scripts.
    pub uglify: Tool,
}

impl Default for Preset {
    fn default() -> Self {
        Self {
            retina: false,
            append_unicode: true,
            coffee: Tool::coffee(),
            uglify: Tool::uglify(),
        }
    }
}

impl Preset {
    /// Declares every task of the preset and its watch bindings.
    pub fn blueprint(self) -> Result<Blueprint, GraphError> {
        let Preset {
            retina,
            append_unicode,
            coffee,
            uglify,
        } = self;
        let vendor_uglify = uglify.clone();
        let mut blueprint = Blueprint::new();

        blueprint
            .register_batch([
                Task::new("clean", clean),
                Task::new("styles", styles),
                Task::new("scripts", move |ctx| scripts(ctx, &coffee, &uglify)),
                Task::new("scripts-vendors", move |ctx| scripts_vendors(ctx, &vendor_uglify)),
                Task::new("scripts-concat", scripts_concat),
                Task::new("scripts-delete-vendors", scripts_delete_vendors),
                Task::new("sprite", move |ctx| {
                    let opts = SpriteOptions {
                        retina,
                        ..SpriteOptions::from_context(ctx)
                    };
                    sprite(ctx, &opts)?.check(ctx.policy)
                }),
                Task::new("compress-images", compress_images),
                Task::new("iconfont", move |ctx| {
                    let opts = IconfontOptions {
                        append_unicode,
                        ..IconfontOptions::from_context(ctx)
                    };
                    iconfont(ctx, &opts)?.check(ctx.policy)
                }),
            ])?
            .register(Task::flow(
                "build",
                Flow::series([
                    Flow::task("clean"),
                    Flow::parallel(["sprite", "iconfont"]),
                    Flow::parallel(["styles", "scripts", "scripts-vendors"]),
                    Flow::task("scripts-concat"),
                    Flow::task("scripts-delete-vendors"),
                    Flow::task("compress-images"),
                ]),
            ))?;

        blueprint
            .watch("styles/**/*.scss", "styles")
            .watch(
                "scripts/**/*.coffee",
                Flow::series([
                    "scripts",
                    "scripts-vendors",
                    "scripts-concat",
                    "scripts-delete-vendors",
                ]),
            )
            .watch("images/sprite/2x/**/*", "sprite")
            .watch("images/**/*", "compress-images")
            .watch("icons/**/*", "iconfont");

        Ok(blueprint)
    }
}

fn clean(ctx: &TaskContext<'_>) -> anyhow::Result<Outcome> {
    io::remove([ctx.dest("styles"), ctx.dest("scripts"), ctx.dest("images")])?;
    Ok(Outcome::default())
}

fn styles(ctx: &TaskContext<'_>) -> anyhow::Result<Outcome> {
    let sass = Sass::new().include_paths(SASS_PATHS.map(|path| ctx.vendor(path)));

    let chain = Chain::new()
        .step(Step::each(SourceMaps).when(Env::Dev))
        .step(Step::each(sass))
        .step(Step::each(Rename::suffix(".min")).when(Env::Prod))
        .step(Step::each(MinifyCss).when(Env::Prod))
        .step(Step::each(SelectorLimit::new(SELECTOR_LIMIT)))
        .step(Step::each(Size::new("styles")))
        .step(Step::each(Size::gzip("styles")));

    let files = FileSet::new([ctx.src("styles/style.scss")])?;
    ctx.chain(&chain).run(&files, ctx.dest("styles"))?.check(ctx.policy)
}

fn scripts(ctx: &TaskContext<'_>, coffee: &Tool, uglify: &Tool) -> anyhow::Result<Outcome> {
    let chain = Chain::new()
        .step(Step::each(SourceMaps).when(Env::Dev))
        .step(Step::each(coffee.clone()))
        .step(Step::all(Concat::new("app.js")))
        .step(Step::each(Rename::suffix(".min")).when(Env::Prod))
        .step(Step::each(uglify.clone()).when(Env::Prod));

    let files = FileSet::new([ctx.src("scripts/**/*.coffee")])?;
    ctx.chain(&chain).run(&files, ctx.dest("scripts"))?.check(ctx.policy)
}

fn scripts_vendors(ctx: &TaskContext<'_>, uglify: &Tool) -> anyhow::Result<Outcome> {
    let chain = Chain::new()
        .step(Step::all(Concat::new("vendor.js")))
        .step(Step::each(Rename::suffix(".min")).when(Env::Prod))
        .step(Step::each(uglify.clone()).when(Env::Prod));

    let files = FileSet::new([ctx.vendor("angular/angular.js")])?;
    ctx.chain(&chain).run(&files, ctx.dest("scripts"))?.check(ctx.policy)
}

fn scripts_concat(ctx: &TaskContext<'_>) -> anyhow::Result<Outcome> {
    let chain = Chain::new()
        .step(Step::all(Concat::new("app.min.js")).when(Env::Prod))
        .step(Step::each(Size::new("scripts")));

    let files = FileSet::new([
        ctx.dest("scripts/vendor.min.js"),
        ctx.dest("scripts/app.min.js"),
    ])?;
    ctx.chain(&chain).run(&files, ctx.dest("scripts"))?.check(ctx.policy)
}

fn scripts_delete_vendors(ctx: &TaskContext<'_>) -> anyhow::Result<Outcome> {
    io::remove([ctx.dest("scripts/vendor.min.js")])?;
    Ok(Outcome::default())
}

fn compress_images(ctx: &TaskContext<'_>) -> anyhow::Result<Outcome> {
    let chain = Chain::new().step(Step::each(ImageMin::default()));

    let files = FileSet::new([
        ctx.src("images/**/*").into_string(),
        format!("!{}", ctx.src("images/sprite")),
        format!("!{}", ctx.src("images/sprite/**")),
    ])?
    .changed(ctx.dest("images"));

    ctx.chain(&chain).run(&files, ctx.dest("images"))?.check(ctx.policy)
}
