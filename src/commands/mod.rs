pub mod evaluate;
pub mod export_sample;
pub mod score;
pub mod train;
