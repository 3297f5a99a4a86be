use serde::{Deserialize, Serialize};

/// One decoded message from the replication stream.
///
/// A record is fully populated by a single decode and is never mutated by
/// the producer afterwards; consumers must treat it as immutable. Values
/// keep their on-the-wire form: string constants include their surrounding
/// quotes and escapes, numeric and null constants carry none, and neither
/// names nor values are unescaped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationOperation {
    /// WAL position of the message, formatted as two 32-bit hex halves
    /// joined by `/` (e.g. `16/B374D848`).
    pub position: String,
    /// One of `BEGIN`, `COMMIT`, `INSERT`, `UPDATE`, `DELETE`.
    pub operation: String,
    /// The transaction id literal for BEGIN/COMMIT; for row changes, the
    /// fully-qualified table name exactly as emitted.
    pub target: String,
    /// Pre-image key columns, present on DELETE and on UPDATE messages
    /// that carry an old-key tuple. Always the same length as
    /// `old_values`.
    pub old_columns: Vec<String>,
    pub old_values: Vec<String>,
    /// Post-image columns, present on INSERT and UPDATE. Always the same
    /// length as `new_values`.
    pub new_columns: Vec<String>,
    pub new_values: Vec<String>,
}
