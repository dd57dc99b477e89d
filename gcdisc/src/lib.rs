#![deny(
    absolute_paths_not_starting_with_crate,
    explicit_outlives_requirements,
    trivial_casts,
    unconditional_recursion,
    unreachable_patterns,
    unused_import_braces,
    unused_must_use
)]

#[macro_use]
mod macros;

pub mod common;
pub mod disc;
pub mod file;
pub mod patch;
pub mod service;
