// Allow dead code for items that are part of the public API but only used in tests
#![allow(dead_code)]

pub mod config;
pub mod context;
pub mod convert;
pub mod data;
pub mod dialect;
pub mod error;
pub mod import;
pub mod logging;
pub mod parser;
pub mod reader;
pub mod schema;
pub mod store;
pub mod target;
pub mod writer;

pub use context::{CancelToken, ConversionContext, ConvertOptions, Mode};
pub use error::{ImportError, StoreError};
pub use import::{DumpImporter, ImportReport};
