//! Crate root: lightweight module orchestration and public re-exports.
//!
//! Modules:
//! - `bitfield`: fixed-width bitsets representing rasterized ranges.
//! - `geodata`: georeferenced occurrence records grouped by taxon.
//! - `raster`: the pixel universe and per-taxon `obs`/`fill` ranges.
//! - `tree`: dense-array rooted trees, tabular and parenthetical readers.
//! - `events`: the reconstruction core — event tags, cost functions, the
//!   OR constructor and the incremental down-pass.
//! - `recfile`: event-assignment tables and evaluation summaries.
//! - `search`: the parallel flip search driver.
//!
//! Public API kept stable by re-exporting key items from the modules.

pub mod bitfield;
pub mod error;
pub mod events;
pub mod geodata;
pub mod raster;
pub mod recfile;
pub mod search;
pub mod tree;

pub use error::{Error, Result};
pub use events::{CostModel, Eval, Event, Reconstruction};
pub use raster::{rasterize, Raster};
pub use search::{search_trees, SearchConfig};
