pub mod level;
pub mod weighting;
