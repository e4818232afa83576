pub mod batch;

pub use batch::{Batch, BatchFormer, BatchType};
