#![doc = include_str!("../README.md")]

mod config;
mod error;
mod id;
mod pipeline;
mod resolver;
mod time;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::id::*;
pub use crate::pipeline::*;
pub use crate::resolver::*;
pub use crate::time::*;
