//! JSON-lines directory store: `<table>.jsonl` per table plus `schema.sql`.

use super::{Mutation, SchemaApplier, TargetStore};
use crate::error::StoreError;
use ahash::AHashMap;
use parking_lot::Mutex;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const WRITER_BUFFER_SIZE: usize = 256 * 1024;

struct TableWriter {
    writer: BufWriter<File>,
}

impl TableWriter {
    fn new(filename: &Path) -> std::io::Result<Self> {
        let file = File::options().create(true).append(true).open(filename)?;
        Ok(Self {
            writer: BufWriter::with_capacity(WRITER_BUFFER_SIZE, file),
        })
    }

    fn write_row(&mut self, mutation: &Mutation) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, &Row(mutation))?;
        self.writer.write_all(b"\n")
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// A mutation rendered as `{"column": value, ...}`
struct Row<'a>(&'a Mutation);

impl Serialize for Row<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.columns.len()))?;
        for (column, value) in self.0.columns.iter().zip(&self.0.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

pub struct JsonlStore {
    output_dir: PathBuf,
    writers: Mutex<AHashMap<String, TableWriter>>,
}

fn permanent(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Permanent(format!("{}: {}", context, e))
}

impl JsonlStore {
    /// Create the output directory if needed
    pub fn new(output_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            writers: Mutex::new(AHashMap::new()),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.output_dir.join(format!("{}.jsonl", table))
    }

    pub fn close_all(&self) -> std::io::Result<()> {
        for writer in self.writers.lock().values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl TargetStore for JsonlStore {
    fn apply(&self, batch: &[Mutation]) -> Result<(), StoreError> {
        use std::collections::hash_map::Entry;

        let mut writers = self.writers.lock();
        let mut touched: Vec<&str> = Vec::new();
        for mutation in batch {
            let writer = match writers.entry(mutation.table.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let path = self.table_path(&mutation.table);
                    let writer = TableWriter::new(&path)
                        .map_err(|e| permanent(&path.display().to_string(), e))?;
                    entry.insert(writer)
                }
            };
            writer
                .write_row(mutation)
                .map_err(|e| permanent(&mutation.table, e))?;
            if !touched.contains(&mutation.table.as_str()) {
                touched.push(&mutation.table);
            }
        }
        // a batch is durable once apply returns
        for table in touched {
            if let Some(writer) = writers.get_mut(table) {
                writer.flush().map_err(|e| permanent(table, e))?;
            }
        }
        Ok(())
    }
}

impl SchemaApplier for JsonlStore {
    fn apply_schema(&self, statements: &[String]) -> Result<(), StoreError> {
        let path = self.output_dir.join("schema.sql");
        let mut script = String::new();
        for stmt in statements {
            script.push_str(stmt);
            script.push_str(";\n\n");
        }
        fs::write(&path, script).map_err(|e| permanent(&path.display().to_string(), e))
    }
}

/// Values of one column across a JSONL file, for inspection and tests
pub fn read_column(path: &Path, column: &str) -> std::io::Result<Vec<serde_json::Value>> {
    let text = fs::read_to_string(path)?;
    let mut out = Vec::new();
    for line in text.lines().filter(|l| !l.is_empty()) {
        let row: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        out.push(row.get(column).cloned().unwrap_or(serde_json::Value::Null));
    }
    Ok(out)
}
