pub mod slicemap;

pub use slicemap::{SliceMapExporter, SliceMapMetric};
