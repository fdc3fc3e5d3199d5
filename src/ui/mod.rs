pub mod histogram;

pub use histogram::{HistogramCurve, HistogramView};
