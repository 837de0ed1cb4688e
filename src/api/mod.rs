pub mod rest;

pub use rest as handlers;
