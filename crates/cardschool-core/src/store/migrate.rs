//! Record schema versions.
//!
//! v1 (unversioned) records are flat: lesson indices sit at the top level
//! and the gate lives under `betaModeConfig`. v2 nests the lesson indices
//! under `lessonState`, stores the gate under `gateState` and wraps
//! everything in `{version, data}`.

use super::{Record, keys};
use crate::gate::GateState;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub const CURRENT_VERSION: u32 = 2;

const V1_LESSON_KEYS: [&str; 3] = ["currentLessonIndex", "previousLessonIndex", "totalLessons"];
const V1_GATE_KEY: &str = "betaModeConfig";
/// Document id the old Mongo-backed store embedded in every record
const V1_ID_KEY: &str = "_id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("stored record is not a JSON object")]
    NotAnObject,
    #[error("record version {0} is newer than supported version {max}", max = CURRENT_VERSION)]
    UnsupportedVersion(u64),
    #[error("record version field is not a number")]
    BadVersion,
    #[error("record data is malformed: {0}")]
    Malformed(String),
}

/// Result of bringing a raw document up to the current version
#[derive(Debug, Clone, PartialEq)]
pub struct Migrated {
    pub record: Record,
    /// Version the document was stored at
    pub from: u32,
}

impl Migrated {
    pub fn changed(&self) -> bool {
        self.from != CURRENT_VERSION
    }
}

/// Upgrade a stored document to the current version
pub fn migrate(raw: Value) -> Result<Migrated, MigrationError> {
    let Value::Object(mut doc) = raw else {
        return Err(MigrationError::NotAnObject);
    };

    let version = match doc.get("version") {
        None => 1,
        Some(Value::Number(n)) => n.as_u64().ok_or(MigrationError::BadVersion)?,
        Some(_) => return Err(MigrationError::BadVersion),
    };

    match version {
        1 => {
            debug!("Migrating v1 record");
            doc.remove("version");
            Ok(Migrated {
                record: migrate_v1(doc),
                from: 1,
            })
        }
        2 => {
            let data = match doc.remove("data") {
                Some(Value::Object(data)) => data,
                None => Map::new(),
                Some(other) => {
                    return Err(MigrationError::Malformed(format!(
                        "expected object under \"data\", found {}",
                        type_name(&other)
                    )));
                }
            };
            Ok(Migrated {
                record: Record::new(data),
                from: 2,
            })
        }
        0 => Err(MigrationError::BadVersion),
        v => Err(MigrationError::UnsupportedVersion(v)),
    }
}

fn migrate_v1(mut flat: Map<String, Value>) -> Record {
    flat.remove(V1_ID_KEY);

    let mut lesson = Map::new();
    for key in V1_LESSON_KEYS {
        let Some(value) = flat.remove(key) else {
            continue;
        };
        match coerce_index(&value) {
            Some(index) => {
                lesson.insert(key.to_string(), Value::from(index));
            }
            None => debug!("Dropping v1 {} that is not an index: {}", key, value),
        }
    }
    if !flat.contains_key(keys::LESSON_STATE) && !lesson.is_empty() {
        flat.insert(keys::LESSON_STATE.to_string(), Value::Object(lesson));
    }

    if let Some(gate) = flat.remove(V1_GATE_KEY) {
        match serde_json::from_value::<GateState>(gate) {
            Ok(state) => match serde_json::to_value(&state) {
                Ok(value) => {
                    flat.insert(keys::GATE_STATE.to_string(), value);
                }
                Err(e) => warn!("Dropping v1 gate state that failed to encode: {}", e),
            },
            // The gate is recomputed from membership when missing
            Err(e) => warn!("Dropping unreadable v1 gate state: {}", e),
        }
    }

    Record::new(flat)
}

/// v1 indices were sometimes stored as strings ("3"), and unset ones as ""
fn coerce_index(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
