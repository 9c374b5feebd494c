//! Problem definition provisioning
//!
//! Resolves a package reference (name + URL) to a local directory holding
//! the problem definition consumed by the objective callbacks. Supports git
//! sources (clone, then pull on re-resolution) and gzip-tar archives over
//! HTTP(S) (download, then extract). The cache root is injected at
//! construction; one subdirectory per package name.

mod package;

pub use package::*;
