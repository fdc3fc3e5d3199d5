pub mod app;
pub mod color;
pub mod config;
pub mod export;
pub mod raster;
pub mod renderer;
pub mod stats;
pub mod ui;
