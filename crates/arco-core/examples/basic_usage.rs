//! Basic usage example demonstrating core Arco row primitives.
//!
//! Run with: `cargo run --example basic_usage`

use arco_core::error::Result;
use arco_core::prelude::*;
use arco_core::{LogFormat, init_logging};

fn main() -> Result<()> {
    init_logging(LogFormat::Pretty);

    // Build a positional row
    let row = Row::from_values([ScalarValue::Int64(1), ScalarValue::from("aaa")]);
    println!("Row: {row}");
    println!("Canonical form: {}", row.canonical_string());

    // Project the identity columns and hash them the same way in every process
    let key = row.project(&[0])?;
    let hash = stable_hash64(arco_core::row::canonical_join(&key).as_bytes());
    println!("Key hash: {hash:016x}");

    // Rows with the wrong arity are rejected
    if let Err(err) = row.check_arity(3) {
        println!("Rejected: {err}");
    }

    Ok(())
}
