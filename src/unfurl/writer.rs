use crate::unfurl::processor::{ProcessingResult, Table};
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Destination for finished tables
pub trait TableSink {
    fn write_table(&mut self, table: &Table) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Write every table of a batch, then flush
    fn write_result(&mut self, result: &ProcessingResult) -> Result<()> {
        for table in result.tables.values() {
            self.write_table(table)?;
        }
        self.flush()
    }
}

/// Writes each table to its own JSON Lines file in a directory
pub struct TableFileWriter {
    dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl TableFileWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        let dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

        Ok(TableFileWriter {
            dir,
            writers: HashMap::new(),
        })
    }

    /// File a table is appended to
    pub fn path_for(&self, table: &str) -> PathBuf {
        let file_stem: String = table
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        self.dir.join(format!("{}.jsonl", file_stem))
    }

    fn writer_for(&mut self, table: &str) -> Result<&mut BufWriter<File>> {
        if !self.writers.contains_key(table) {
            let path = self.path_for(table);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open file: {}", path.display()))?;
            self.writers.insert(table.to_string(), BufWriter::new(file));
        }
        self.writers
            .get_mut(table)
            .with_context(|| format!("No writer for table: {}", table))
    }
}

impl TableSink for TableFileWriter {
    fn write_table(&mut self, table: &Table) -> Result<()> {
        let writer = self.writer_for(&table.name)?;
        for row in &table.rows {
            let json = serde_json::to_string(row).context("Failed to serialize row")?;
            writeln!(writer, "{}", json).context("Failed to write row")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush().context("Failed to flush writer")?;
        }
        Ok(())
    }
}

/// Writes all tables to one stream, tagging each row with its table name
pub struct StreamWriter<W: Write> {
    writer: W,
    tag: String,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(writer: W) -> Self {
        StreamWriter {
            writer,
            tag: "_table".to_string(),
        }
    }

    /// Use a different key for the table name
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TableSink for StreamWriter<W> {
    fn write_table(&mut self, table: &Table) -> Result<()> {
        for row in &table.rows {
            let mut data = row.to_json_map();
            data.insert(self.tag.clone(), Value::String(table.name.clone()));

            let json = serde_json::to_string(&data).context("Failed to serialize row")?;
            writeln!(self.writer, "{}", json).context("Failed to write row")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush writer")
    }
}
