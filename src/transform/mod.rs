//! Built-in transform steps that don't delegate to an external collaborator.

mod concat;
mod rename;
mod rev;
mod selector;
mod size;
mod sourcemap;

pub use concat::Concat;
pub use rename::Rename;
pub use rev::Rev;
pub use selector::{SelectorLimit, count_selectors};
pub use size::Size;
pub use sourcemap::SourceMaps;
