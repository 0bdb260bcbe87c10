use std::io::{self, BufWriter};
use std::path::Path;
use std::time::Instant;

use collection_reader::config::{load_config, write_config, ReaderConfig};
use collection_reader::output::{OutputFormat, RecordWriter};
use collection_reader::ui::{self, ReadProgress, TableBuilder};
use collection_reader::{run_collection, BackendKind, DocumentCursor};
use indicatif::HumanDuration;

pub fn run_init(backend: BackendKind, path: &Path, force: bool) -> anyhow::Result<()> {
    let config = ReaderConfig::template(backend);
    write_config(path, &config, force)?;
    ui::success(&format!("Wrote {} reader configuration to {}", backend.as_str(), path.display()));
    ui::info("Next", &format!("edit it, then run `collection-reader check --config {}`", path.display()));
    Ok(())
}

pub fn run_check(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(Some(config_path))?;
    ui::header(&format!("Checking {}", config_path.display()));

    let mut cursor = DocumentCursor::open(&config)?;
    let progress = cursor.progress();
    let max_items = config.max_items.map(|n| n.to_string());
    let total = progress
        .total
        .map(|n| n.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut table = TableBuilder::new();
    table.add_row("backend", config.backend.as_str());
    table.add_row("target", &config.target());
    table.add_row("id field", &config.id_field);
    table.add_row("text field", &config.text_field);
    table.add_optional("language field", config.language_field.as_deref());
    table.add_optional("language", config.language.as_deref());
    table.add_optional("max items", max_items.as_deref());
    table.add_optional("resume after", config.resume_after.as_deref());
    table.add_row("documents", &total);
    println!("{}", table.build());

    let has_documents = cursor.has_next();
    cursor.close()?;

    if has_documents {
        ui::success("Source is readable");
    } else {
        ui::warn("Source is readable but no document matches");
    }
    Ok(())
}

pub fn run_read(config_path: &Path, format: OutputFormat, limit: Option<u64>) -> anyhow::Result<()> {
    let mut config = load_config(Some(config_path))?;
    if let Some(limit) = limit {
        config.max_items = Some(limit);
    }

    ui::header(&format!("Reading {} ({})", config.target(), config.backend.as_str()));
    let started = Instant::now();
    let mut cursor = DocumentCursor::open(&config)?;
    let progress = ReadProgress::new(cursor.progress());

    let stdout = io::stdout();
    let mut writer = RecordWriter::new(BufWriter::new(stdout.lock()), format);

    match run_collection(&mut cursor, &mut writer, |p| progress.update(p)) {
        Ok(summary) => {
            writer.into_inner()?;
            progress.finish_with_summary(summary.elapsed, summary.documents);
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            ui::error(&format!("Stopped after {} documents", writer.written()));
            ui::timing(&format!("after {}", HumanDuration(started.elapsed())));
            Err(e.into())
        }
    }
}
