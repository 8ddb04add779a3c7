pub mod api;
pub mod config;
pub mod http;
pub mod images;
pub mod jobs;
pub mod merge;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod product;
pub mod providers;
pub mod text;

pub use pipeline::{AnalysisMeta, AnalysisReport, AnalyzeOptions, Pipeline};
pub use product::AnalyzedProduct;
