pub mod common;
pub mod info;
pub mod patch;
pub mod status;
