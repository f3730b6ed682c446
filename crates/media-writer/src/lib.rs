mod config;
mod file_type;
pub mod memory;
mod settings;
mod sink;
mod time;
mod writer;

pub use config::*;
pub use file_type::*;
pub use settings::*;
pub use sink::*;
pub use time::*;
pub use writer::*;
