#![allow(dead_code)]

pub use log::{debug, info, warn};

pub type Mat = nalgebra::DMatrix<f64>;
pub type DVec = nalgebra::DVector<f64>;

/// ln(2π)
pub const LN_2PI: f64 = 1.837_877_066_409_345_5;
