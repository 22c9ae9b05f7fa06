//! Dataset records and their on-disk representation.

pub mod item;
pub mod npz;
pub mod reader;
pub mod storage;
pub mod tensor;
