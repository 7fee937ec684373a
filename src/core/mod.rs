//! Core data structures for weather series and forecasts.

mod daily;
mod forecast;
mod time_series;

pub use daily::{DailySeries, Provenance};
pub use forecast::{Forecast, ForecastPoint, ForecastResult};
pub use time_series::{TimeSeries, TimeSeriesBuilder};
