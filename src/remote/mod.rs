//! Support for downloading image archives over HTTP

mod client;

pub use client::*;
