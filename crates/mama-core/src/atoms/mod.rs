// ── MAMA OS Atoms Layer ────────────────────────────────────────────────────
// Pure constants, error types, and data-model structs — zero side effects, no I/O.
// Dependency rule: atoms may only depend on std and external pure crates.
// Nothing here may import from a component module or the daemon entry point.

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;
