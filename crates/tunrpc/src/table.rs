//! Well-known values shared by both ends of a version 1 connection.

use std::sync::OnceLock;

use tunpack::ObjectTable;
use tunpack::Value;

/// Attachment key under which a server lists the attachments it wants returned.
pub const RETURNED_KEYS: &str = "jboss.returned.keys";

fn entries() -> &'static [Value] {
    static ENTRIES: OnceLock<Vec<Value>> = OnceLock::new();
    ENTRIES.get_or_init(|| {
        vec![
            Value::object("org.jboss.ejb.client.Affinity$NoAffinity", vec![]),
            Value::object("org.jboss.ejb.client.Affinity$LocalAffinity", vec![]),
            Value::string(RETURNED_KEYS),
        ]
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolV1ObjectTable;

impl ObjectTable for ProtocolV1ObjectTable {
    fn index_of(&self, value: &Value) -> Option<u8> {
        let index = entries().iter().position(|entry| entry == value)?;
        u8::try_from(index).ok()
    }

    fn value_at(&self, index: u8) -> Option<Value> {
        entries().get(usize::from(index)).cloned()
    }
}
