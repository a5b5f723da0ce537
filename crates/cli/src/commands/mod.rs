pub mod clone;
pub mod migrate;
pub mod templates;
pub mod tokens;

use common::error::MigratorError;
use serde::Serialize;

/// Prints `value` to stdout as pretty JSON.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), MigratorError> {
    let rendered = serde_json::to_string_pretty(value).map_err(MigratorError::run)?;
    println!("{rendered}");
    Ok(())
}
