//! Core trait definitions

mod node;

pub use node::{ByteStream, Download, NodeApi};
