pub mod dmatrix_util;
pub mod traits;

pub use dmatrix_util::*;
