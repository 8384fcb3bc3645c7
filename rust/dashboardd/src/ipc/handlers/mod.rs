pub mod core;
pub mod submissions;
pub mod tables;

mod selection;
