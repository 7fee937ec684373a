//! ARIMA (Autoregressive Integrated Moving Average) model.

mod diff;
mod model;

pub use diff::{difference, integrate};
pub use model::{Arima, ArimaSpec};
