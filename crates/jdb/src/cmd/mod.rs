//! Command modules for the JDB CLI

pub mod attach;

pub use attach::{attach, AttachArgs};
