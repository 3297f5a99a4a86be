pub mod decoder;
pub mod receiver;
pub mod scan;
pub mod types;



pub use decoder::{decoder_for, PluginDecoder, TestDecoding};
pub use receiver::{format_lsn, parse_lsn, AckHandle, LogicalReceiver};
pub use scan::{scan_constant, scan_identifier, scan_type};
pub use types::ReplicationOperation;
