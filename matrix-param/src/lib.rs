pub mod dvector_gamma;
pub mod gaussian;
pub mod traits;

pub use dvector_gamma::*;
pub use gaussian::*;
pub use traits::*;
