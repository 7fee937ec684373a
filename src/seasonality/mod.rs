//! Seasonal decomposition and cycle detection.
//!
//! - STL: Seasonal-Trend decomposition using LOESS
//! - MSTL: STL over several seasonal periods
//! - periodogram: FFT power spectrum and dominant cycle

mod mstl;
mod periodogram;
mod stl;

pub use mstl::{Mstl, MultiDecomposition};
pub use periodogram::{dominant_cycle, periodogram, DominantCycle};
pub use stl::{Decomposition, Stl};
