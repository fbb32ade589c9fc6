//! Writing image contents onto the local filesystem

pub mod tar;
