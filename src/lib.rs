//! # govm Core Library
//!
//! This crate contains the core logic of `govm`, a shim-based version manager for the Go
//! toolchain. Several Go versions live side by side in one store; which one a shell's `go`
//! runs is decided per invocation from `GOVM_VERSION`, the nearest `.go-version` file, or the
//! global default.
//!
//! The store is shared by independent processes. Installs and removals coordinate through
//! per-version lock files and publish their result with a single rename, so a reader sees a
//! version either complete or not at all.
//!
//! ## Modules Overview
//! - [`version`] – Parsing, normalisation and ordering of Go versions
//! - [`store`] – On-disk layout of installed versions and marker files
//! - [`resolver`] – Deciding which version applies for a directory
//! - [`lock`] – Per-version advisory locks shared across processes
//! - [`registry`] – The remote release catalog and archive downloads
//! - [`installer`] – Installing, removing and pruning versions
//! - [`dispatch`] – Re-executing the resolved toolchain binary
//! - [`shims`] – The `go`/`gofmt` scripts that redirect into `govm exec`
//! - [`config`] – Optional `config.toml` under the store root
//! - [`error`] – The error taxonomy shared by all of the above

pub mod config;
pub mod dispatch;
pub mod error;
pub mod installer;
pub mod lock;
pub mod registry;
pub mod resolver;
pub mod shims;
pub mod store;
pub mod version;

pub use config::*;
pub use dispatch::*;
pub use error::{GovmError, Result};
pub use installer::*;
pub use lock::*;
pub use registry::*;
pub use resolver::*;
pub use shims::*;
pub use store::*;
pub use version::*;
