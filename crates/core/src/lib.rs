#![no_std]

extern crate alloc;

pub mod key;
pub mod nodes;
pub mod trie;

mod account;
mod error;
mod header;

pub use account::*;
pub use error::*;
pub use header::*;
pub use key::storage_key;

#[cfg(feature = "bundle")]
mod bundle;

#[cfg(feature = "bundle")]
pub use bundle::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod fixtures;
