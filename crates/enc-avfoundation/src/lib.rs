#![cfg(target_os = "macos")]

mod asset_writer;

pub use asset_writer::*;
