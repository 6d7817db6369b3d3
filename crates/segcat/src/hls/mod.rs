mod filter;
pub mod list;
mod playlist;
pub mod range;
pub mod select;

pub use playlist::*;
pub use range::SelectExpr;
pub use select::{select_best, Selection};
