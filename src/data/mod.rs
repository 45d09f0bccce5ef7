//! Sample storage and analysis.

pub mod estimator;
pub mod fft;
pub mod sample_buffer;
pub mod storage;
