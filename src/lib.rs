#![warn(clippy::all, rust_2018_idioms)]

pub mod analysis;
pub mod error;
pub mod fitter;
pub mod histoer;
pub mod util;
