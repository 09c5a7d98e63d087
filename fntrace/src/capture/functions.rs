//! Function identifier space owned by the capture engine
//!
//! Instrumentation engines hand us opaque per-function values (listener
//! data, hook handles, runtime addresses). Those are only ever used as keys
//! here; the engine hands out dense `u16` identifiers that fit the packed
//! [`fntrace_common::Event`] and can be mapped back to names offline.

use fntrace_common::MAX_FUNCTIONS;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};

use crate::domain::{CaptureError, ExportError, FunctionId};

/// One instrumented function as known to the capture engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracedFunction {
    pub id: FunctionId,
    /// Opaque key supplied by the instrumentation side (never dereferenced)
    pub key: u64,
    /// Mangled or plain symbol name
    pub name: String,
    /// Module (library) the function belongs to, used as trace category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
}

/// Dense table of traced functions, indexed by [`FunctionId`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionTable {
    functions: Vec<TracedFunction>,
    #[serde(skip)]
    by_key: HashMap<u64, FunctionId>,
}

impl FunctionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign an identifier to `key`.
    ///
    /// Registering the same key again returns the identifier it already has.
    ///
    /// # Errors
    /// Returns [`CaptureError::TooManyFunctions`] once the 16-bit id space is
    /// exhausted.
    pub fn register(
        &mut self,
        key: u64,
        name: impl Into<String>,
        module: Option<String>,
    ) -> Result<FunctionId, CaptureError> {
        if let Some(&id) = self.by_key.get(&key) {
            return Ok(id);
        }

        let next = u16::try_from(self.functions.len())
            .map_err(|_| CaptureError::TooManyFunctions { limit: MAX_FUNCTIONS })?;
        let id = FunctionId(next);
        self.functions.push(TracedFunction {
            id,
            key,
            name: name.into(),
            module,
            file: None,
            line: None,
        });
        self.by_key.insert(key, id);
        Ok(id)
    }

    /// Attach a source location to an already registered function
    pub fn set_source(&mut self, id: FunctionId, file: String, line: i64) {
        if let Some(function) = self.functions.get_mut(usize::from(id.0)) {
            function.file = Some(file);
            function.line = Some(line);
        }
    }

    #[must_use]
    pub fn get(&self, id: FunctionId) -> Option<&TracedFunction> {
        self.functions.get(usize::from(id.0))
    }

    #[must_use]
    pub fn id_for_key(&self, key: u64) -> Option<FunctionId> {
        self.by_key.get(&key).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TracedFunction> {
        self.functions.iter()
    }

    /// Write the table as JSON so an offline decoder can name the ids
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails
    pub fn save<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Read a table written by [`FunctionTable::save`]
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed
    pub fn load<R: Read>(reader: R) -> Result<Self, ExportError> {
        let mut table: FunctionTable = serde_json::from_reader(reader)?;
        table.by_key = table.functions.iter().map(|f| (f.key, f.id)).collect();
        Ok(table)
    }
}
