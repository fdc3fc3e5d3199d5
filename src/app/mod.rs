//! Viewer-side state: view transform, canvas compositing, pixel search and the
//! glue that ties images, dialogs and deferred work together.

pub mod canvas;
pub mod file_dialog;
pub mod pixel_locator;
pub mod transform;
pub mod types;
pub mod viewer;

pub use canvas::{Canvas, DrawCommand, PixelValueLabel};
pub use pixel_locator::{PixelLocator, SearchKind};
pub use transform::TransformEngine;
pub use types::{CanvasModifiers, Direction, HistogramScale, Metric, ResizeMode, ScrollModifier, Tonemap, TonemapSettings};
pub use viewer::Viewer;
