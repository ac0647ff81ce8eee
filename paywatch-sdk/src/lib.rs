//! Wire objects for paywatch.
//!
//! These types carry no I/O and no database bindings. The core crate maps them
//! onto its `sqlx::Type` counterparts.

pub mod objects;
