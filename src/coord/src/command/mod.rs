pub mod common;
pub mod gc;
pub mod serve;
pub mod verify;
