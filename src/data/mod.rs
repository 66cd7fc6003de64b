//! Row files and charts for captured records.
pub mod plot;
pub mod storage;

pub use plot::{AxisScale, LineChart, StemChart};
pub use storage::{read_rows, write_rows};
