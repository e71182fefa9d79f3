pub mod bcast;
pub mod codegen;
pub mod common;
pub mod layout;
pub mod tensorspec;
pub mod utils;
#[cfg(feature = "verification")]
pub mod verification;

// Re-exported for the `shape!` macro.
pub use smallvec;
