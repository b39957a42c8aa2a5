// Layer3 Common Module - Shared order book statistics

pub mod book_math;

pub use book_math::{calc_imbalance, median_quantity};
