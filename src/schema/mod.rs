//! Raw health sample schema
//!
//! This module defines the shape of samples handed back by the health data
//! source, their units, and the document layouts they can be loaded from.

mod parse;
mod sample;

pub use parse::*;
pub use sample::*;
