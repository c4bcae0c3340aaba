use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Poll,
    Refresh,
}

/// Writes session events as JSON lines, each tagged with the session kind.
pub struct EventWriter<W: Write> {
    writer: W,
}

impl<W: Write> EventWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_event<E: Serialize>(&mut self, kind: SessionKind, event: &E) -> Result<()> {
        let mut value = serde_json::to_value(event)?;
        if let serde_json::Value::Object(fields) = &mut value {
            fields.insert("session".to_string(), serde_json::to_value(kind)?);
        }
        serde_json::to_writer(&mut self.writer, &value)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
