//! Record output: terminal line, JSON lines and CSV files.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::record::{Record, Value};

/// Formats a record as one `|`-separated line with per-field precision and
/// unit suffix, e.g. `12.5s|3|0.6mm|172.80mm/h`.
pub fn format_line(record: &Record) -> String {
    let parts: Vec<String> = record
        .iter()
        .map(|(field, value)| match value {
            Value::F32(v) => format!("{:.*}{}", field.precision as usize, v, field.unit),
            Value::F64(v) => format!("{:.*}{}", field.precision as usize, v, field.unit),
            Value::U32(v) => format!("{}{}", v, field.unit),
            Value::I32(v) => format!("{}{}", v, field.unit),
        })
        .collect();
    parts.join("|")
}

/// One CSV cell. Floats always carry a decimal point (`1.0`, not `1`) so
/// float columns stay recognisable as floats; `Debug` gives the shortest
/// representation that round-trips.
fn csv_cell(value: &Value) -> String {
    match value {
        Value::F32(v) => format!("{:?}", v),
        Value::F64(v) => format!("{:?}", v),
        Value::U32(v) => v.to_string(),
        Value::I32(v) => v.to_string(),
    }
}

/// How records are shown on the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Rewrite a single status line in place.
    Status,
    /// One line per record.
    Log,
    /// One JSON object per line.
    Json,
}

/// Writes records to a terminal-like stream.
pub struct Printer<W: Write> {
    out: W,
    mode: DisplayMode,
}

impl<W: Write> Printer<W> {
    pub fn new(out: W, mode: DisplayMode) -> Self {
        Self { out, mode }
    }

    pub fn print(&mut self, record: &Record) -> io::Result<()> {
        match self.mode {
            DisplayMode::Status => write!(self.out, "\r{}", format_line(record))?,
            DisplayMode::Log => writeln!(self.out, "{}", format_line(record))?,
            DisplayMode::Json => {
                serde_json::to_writer(&mut self.out, record)?;
                writeln!(self.out)?;
            }
        }
        self.out.flush()
    }

    /// Ends a pending status line so later output starts on a fresh line.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.mode == DisplayMode::Status {
            writeln!(self.out)?;
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Appends records to a CSV destination.
///
/// The header row of field names is written before the first record only
/// when the destination started out empty.
pub struct CsvSink<W: Write> {
    writer: W,
    needs_header: bool,
}

impl CsvSink<File> {
    /// Opens `path` for appending, creating it if missing.
    pub fn append(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let empty = file.metadata()?.len() == 0;
        Ok(Self::new(file, empty))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W, needs_header: bool) -> Self {
        Self {
            writer,
            needs_header,
        }
    }

    pub fn write_record(&mut self, record: &Record) -> io::Result<()> {
        if self.needs_header {
            let header: Vec<&str> = record.schema().field_names().collect();
            writeln!(self.writer, "{}", header.join(","))?;
            self.needs_header = false;
        }
        let row: Vec<String> = record.values().iter().map(csv_cell).collect();
        writeln!(self.writer, "{}", row.join(","))?;
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
