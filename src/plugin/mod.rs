//! Steps and tasks backed by a collaborator: a compiler, an image codec, a
//! template engine or an external program.

mod iconfont;
pub(crate) mod image;
mod outline;
mod sass;
mod sprite;
mod template;
mod tool;

pub use iconfont::{CodePoint, Glyph, IconFont, IconfontOptions, assign_code_points, iconfont};
pub use self::image::{ImageMin, Resize};
pub use sass::{MinifyCss, Sass};
pub use sprite::{Sprite, SpriteOptions, SpriteSheet, compose, sprite};
pub use template::{parse_binding, render_file, render_str};
pub use tool::Tool;
