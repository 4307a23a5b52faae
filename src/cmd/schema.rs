use super::{load_config, resolve_dialect};
use crate::config::CliOverrides;
use crate::context::ConversionContext;
use crate::dialect::dialect_for;
use crate::import::{DumpImporter, ImportReport, IssueReport};
use crate::reader::DumpReader;
use crate::store::MemoryStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Serialize)]
struct SchemaJsonOutput {
    input_file: String,
    dialect: String,
    target_dialect: String,
    ddl: Vec<String>,
    issues: Vec<IssueReport>,
}

pub fn run(
    file: PathBuf,
    dialect: Option<String>,
    target_dialect: Option<String>,
    config: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    if !file.exists() {
        anyhow::bail!("input file does not exist: {}", file.display());
    }

    let config = load_config(
        config.as_deref(),
        CliOverrides {
            source_dialect: dialect,
            target_dialect,
            workers: None,
        },
    )?;
    let dialect = resolve_dialect(&file, config.source_dialect()?, json)?;

    let store = Arc::new(MemoryStore::new());
    let importer = DumpImporter::new(dialect_for(dialect), store.clone(), store);
    let mut ctx = ConversionContext::new(config.convert_options());
    let mut reader = DumpReader::from_path(&file)?;
    let ddl = importer.create_schema(&mut ctx, &mut reader)?;
    let issues = ImportReport::from_context(&ctx, file.display().to_string()).issues;

    if json {
        let output = SchemaJsonOutput {
            input_file: file.display().to_string(),
            dialect: dialect.to_string(),
            target_dialect: config.target_dialect.to_string(),
            ddl,
            issues,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for stmt in &ddl {
        println!("{};\n", stmt);
    }

    if !issues.is_empty() {
        eprintln!("Conversion issues:");
        for issue in &issues {
            match &issue.column {
                Some(col) => eprintln!("  - {}.{}: {}", issue.table, col, issue.description),
                None => eprintln!("  - {}: {}", issue.table, issue.description),
            }
        }
        eprintln!();
    }
    eprintln!(
        "{} table(s), {} statement(s), {} issue(s)",
        ctx.target().len(),
        ddl.len(),
        issues.len()
    );
    Ok(())
}
