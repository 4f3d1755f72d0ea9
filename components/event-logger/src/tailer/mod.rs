pub mod models;
pub mod payload;
pub mod tailer;
