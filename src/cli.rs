//! Command line interface of the `assetline` binary.

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};

use crate::core::{Env, ErrorPolicy, RunContext};
use crate::logging::LogLevel;
use crate::preset::Preset;

#[derive(Parser, Debug, Clone)]
#[command(name = "assetline", version, about = "Builds front-end assets")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Environment mode.
    #[arg(long, global = true, env = "NODE_ENV", default_value = "prod")]
    pub env: Env,

    /// Root of the source tree.
    #[arg(long, global = true, default_value = "./app")]
    pub src: Utf8PathBuf,

    /// Root of the destination tree.
    #[arg(long, global = true, default_value = "./public")]
    pub dest: Utf8PathBuf,

    /// Root of third-party packages.
    #[arg(long, global = true, default_value = "./bower_components")]
    pub vendor: Utf8PathBuf,

    /// Fail a task when any of its files fails.
    #[arg(long, global = true)]
    pub strict: bool,

    /// Also build a retina sprite sheet.
    #[arg(long, global = true)]
    pub retina: bool,

    /// Don't prefix new icon files with their code point.
    #[arg(long, global = true)]
    pub keep_icon_names: bool,

    /// Port of the development server; live reload listens on the next one.
    #[arg(long, global = true, env = "ASSETLINE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// CoffeeScript compiler to run instead of `coffee`.
    #[arg(long, global = true, value_name = "PROGRAM")]
    pub coffee: Option<String>,

    /// JavaScript minifier to run instead of `uglifyjs`.
    #[arg(long, global = true, value_name = "PROGRAM")]
    pub uglify: Option<String>,

    /// Log level, overrides `ASSETLINE_LOG`.
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run tasks, `build` when none are named.
    Run {
        tasks: Vec<String>,

        /// Keep watching after the run.
        #[arg(long)]
        watch: bool,

        /// Serve the destination tree while watching.
        #[arg(long, requires = "watch")]
        serve: bool,
    },
    /// Watch the source tree and rebuild on change.
    Watch {
        /// Serve the destination tree.
        #[arg(long)]
        serve: bool,
    },
    /// List registered tasks.
    List,
    /// Render a template with data bindings.
    Render {
        template: Utf8PathBuf,

        /// A `KEY=VALUE` binding; values parse as JSON when they can.
        #[arg(long = "data", short = 'd', value_parser = crate::plugin::parse_binding)]
        data: Vec<(String, serde_json::Value)>,

        /// Output file, standard output when omitted.
        #[arg(long, short = 'o')]
        out: Option<Utf8PathBuf>,
    },
}

impl GlobalArgs {
    pub fn context(&self) -> RunContext {
        let policy = match self.strict {
            true => ErrorPolicy::Fail,
            false => ErrorPolicy::Continue,
        };

        let mut ctx = RunContext::new(self.env)
            .with_roots(&self.src, &self.dest, &self.vendor)
            .with_policy(policy);
        ctx.port = self.port;
        ctx
    }

    pub fn preset(&self) -> Preset {
        let defaults = Preset::default();
        Preset {
            retina: self.retina,
            append_unicode: !self.keep_icon_names,
            coffee: match &self.coffee {
                Some(program) => defaults.coffee.program(program),
                None => defaults.coffee,
            },
            uglify: match &self.uglify {
                Some(program) => defaults.uglify.program(program),
                None => defaults.uglify,
            },
        }
    }
}
