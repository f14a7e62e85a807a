#![allow(dead_code)]

pub mod fixtures;
pub mod logger;
#[macro_use]
pub mod macros;
