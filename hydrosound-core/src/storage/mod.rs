pub mod metadata;
pub mod path;
pub mod tdms;
