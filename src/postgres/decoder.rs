use tracing::trace;

use super::scan::{scan_constant, scan_identifier, scan_type};
use super::types::ReplicationOperation;
use crate::{Error, Result};

/// A logical decoding output plugin compiled into the crate.
///
/// A decoder consumes exactly one WAL message body and populates the given
/// record. Any deviation from the plugin grammar is a malformed message:
/// the record is left in an indeterminate state and the caller must not
/// deliver it downstream.
pub trait PluginDecoder: Send + Sync {
    fn decode(&self, input: &[u8], op: &mut ReplicationOperation) -> Result<()>;
}

/// Looks up a decoder by output plugin name. All decoders are compiled in;
/// the registry currently holds `test_decoding`.
pub fn decoder_for(plugin: &str) -> Option<&'static dyn PluginDecoder> {
    match plugin {
        "test_decoding" => Some(&TestDecoding),
        _ => None,
    }
}

/// Decoder for the `test_decoding` output plugin, whose messages are one
/// of:
///
/// ```text
/// BEGIN <xid>
/// COMMIT <xid>
/// table <qualified-name>: INSERT: <columns>
/// table <qualified-name>: UPDATE: [old-key: <columns> new-tuple: ]<columns>
/// table <qualified-name>: DELETE: <columns>
/// ```
///
/// where each column entry is `<name>[<type>]:<value>` and entries are
/// separated by a single space.
pub struct TestDecoding;

impl PluginDecoder for TestDecoding {
    fn decode(&self, input: &[u8], op: &mut ReplicationOperation) -> Result<()> {
        // Reset the variable-length fields so a populated record can be
        // recycled.
        op.old_columns.clear();
        op.old_values.clear();
        op.new_columns.clear();
        op.new_values.clear();

        if let Some(xid) = input.strip_prefix(b"BEGIN ") {
            op.operation = "BEGIN".to_string();
            op.target = text(xid);
            return Ok(());
        }
        if let Some(xid) = input.strip_prefix(b"COMMIT ") {
            op.operation = "COMMIT".to_string();
            op.target = text(xid);
            return Ok(());
        }

        let rest = input
            .strip_prefix(b"table ")
            .ok_or_else(|| malformed("unrecognized message prefix"))?;

        let (rest, target) = scan_identifier(rest);
        let target = target.ok_or_else(|| malformed("missing table name"))?;

        let rest = rest
            .strip_prefix(b": ")
            .ok_or_else(|| malformed("missing separator after table name"))?;
        if rest.len() < 6 {
            return Err(malformed("truncated row change message"));
        }
        let (keyword, rest) = rest.split_at(6);
        let rest = rest
            .strip_prefix(b": ")
            .ok_or_else(|| malformed("missing separator after operation"))?;

        op.target = text(target);
        op.operation = text(keyword);
        trace!(operation = %op.operation, target = %op.target, "Decoding row change");

        match keyword {
            b"INSERT" => self.parse_columns(rest, &mut op.new_columns, &mut op.new_values),
            b"DELETE" => self.parse_columns(rest, &mut op.old_columns, &mut op.old_values),
            b"UPDATE" => self.parse_update(rest, op),
            _ => Err(malformed("unknown row operation")),
        }
    }
}

impl TestDecoding {
    /// Parses one `<name>[<type>]:<value>` entry, returning the remainder
    /// with the single trailing separator space, if any, consumed. The
    /// type text is discarded.
    fn parse_column<'a>(&self, src: &'a [u8]) -> Result<(&'a [u8], &'a [u8], &'a [u8])> {
        let (rest, name) = scan_identifier(src);
        let name = name.ok_or_else(|| malformed("missing column name"))?;

        let (rest, ty) = scan_type(rest);
        if ty.is_none() {
            return Err(malformed("missing column type"));
        }

        let (rest, value) = scan_constant(rest);
        let value = value.ok_or_else(|| malformed("missing column value"))?;

        let rest = rest.strip_prefix(b" ").unwrap_or(rest);
        Ok((rest, name, value))
    }

    fn parse_columns(
        &self,
        mut input: &[u8],
        columns: &mut Vec<String>,
        values: &mut Vec<String>,
    ) -> Result<()> {
        while !input.is_empty() {
            let (rest, name, value) = self.parse_column(input)?;
            input = rest;
            columns.push(text(name));
            values.push(text(value));
        }
        Ok(())
    }

    /// An UPDATE body optionally opens with `old-key: ` followed by the
    /// pre-image columns; `new-tuple: ` then introduces the post-image.
    /// The marker is only recognized between column entries, never inside
    /// one, so quoted names containing the marker text decode correctly.
    fn parse_update(&self, mut input: &[u8], op: &mut ReplicationOperation) -> Result<()> {
        if let Some(rest) = input.strip_prefix(b"old-key: ") {
            input = rest;
            while !input.is_empty() {
                let (rest, name, value) = self.parse_column(input)?;
                input = rest;
                op.old_columns.push(text(name));
                op.old_values.push(text(value));

                if let Some(rest) = input.strip_prefix(b"new-tuple: ") {
                    input = rest;
                    break;
                }
            }
        }
        self.parse_columns(input, &mut op.new_columns, &mut op.new_values)
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn malformed(message: &str) -> Error {
    Error::InvalidMessage {
        message: message.to_string(),
    }
}
