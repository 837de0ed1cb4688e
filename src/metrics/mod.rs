pub mod collectors;

pub use collectors::*;
