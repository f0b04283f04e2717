pub mod common;
pub mod contracts;
pub mod domain;
pub mod storage;

pub use domain::*;
