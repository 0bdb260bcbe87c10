use std::io::Write;
use std::sync::OnceLock;

use crate::collection::DocumentConsumer;
use crate::record::DocumentRecord;
use crate::{Error, Result};

static QUIET: OnceLock<bool> = OnceLock::new();

pub fn is_quiet() -> bool {
    *QUIET.get_or_init(|| {
        std::env::var("COLLECTION_READER_QUIET")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    })
}

/// How records are written to the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One JSON object per line
    #[default]
    JsonLines,
    /// `id [lang]` header followed by the text
    Text,
}

impl std::str::FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "jsonl" | "json" => Ok(OutputFormat::JsonLines),
            "text" => Ok(OutputFormat::Text),
            other => Err(Error::Config(format!("unknown output format: {}", other))),
        }
    }
}

/// Consumer that writes every record to `out`
pub struct RecordWriter<W: Write> {
    out: W,
    format: OutputFormat,
    written: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn write_record(&mut self, record: &DocumentRecord) -> Result<()> {
        match self.format {
            OutputFormat::JsonLines => {
                serde_json::to_writer(&mut self.out, record)?;
                writeln!(self.out)?;
            }
            OutputFormat::Text => {
                match &record.language {
                    Some(lang) => writeln!(self.out, "=== {} [{}]", record.id, lang)?,
                    None => writeln!(self.out, "=== {}", record.id)?,
                }
                writeln!(self.out, "{}", record.text)?;
            }
        }
        self.written += 1;
        Ok(())
    }

    pub fn into_inner(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> DocumentConsumer for RecordWriter<W> {
    fn process(&mut self, record: DocumentRecord) -> Result<()> {
        self.write_record(&record)
    }
}
