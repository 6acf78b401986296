use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::api::{SheetExporter, TaskBackend};
use crate::error::{ClientError, ClientResult};
use crate::session::Session;
use crate::task::{NewTask, Priority};

pub const CSV_CONTENT_TYPE: &str = "text/csv";
pub const MISSING_FIELD: &str = "N/A";

const SHEET_LINK_PATTERN: &str = r"docs\.google\.com/spreadsheets/d/([A-Za-z0-9_-]+)";

/// A local file offered for import together with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub content_type: String,
}

impl LocalFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let content_type = content_type_for_path(&path).to_string();
        Self { path, content_type }
    }
}

pub fn content_type_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("csv") => CSV_CONTENT_TYPE,
        Some("txt") => "text/plain",
        Some("tsv") => "text/tab-separated-values",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    SheetLink(String),
    File(LocalFile),
}

impl ImportSource {
    /// Exactly one of `link` and `file` must be given. Blank links count as absent.
    pub fn from_parts(link: Option<String>, file: Option<LocalFile>) -> ClientResult<Self> {
        let link = link.filter(|l| !l.trim().is_empty());
        match (link, file) {
            (Some(_), Some(_)) => Err(ClientError::ImportSourceConflict),
            (None, None) => Err(ClientError::ImportSourceMissing),
            (Some(link), None) => Ok(ImportSource::SheetLink(link.trim().to_string())),
            (None, Some(file)) => Ok(ImportSource::File(file)),
        }
    }
}

/// Extracts the document id from a shared-spreadsheet link.
pub fn sheet_id_from_link(link: &str) -> ClientResult<String> {
    let sheet_re = Regex::new(SHEET_LINK_PATTERN).map_err(|e| {
        ClientError::InvalidLinkFormat(format!("internal regex compile failure: {e}"))
    })?;
    sheet_re
        .captures(link)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
        .ok_or_else(|| ClientError::InvalidLinkFormat(link.to_string()))
}

/// How a data line is cut into fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldSplitting {
    /// Split on every comma. Fields containing commas misalign.
    #[default]
    Plain,
    /// Honour double-quoted fields, including `""` escapes.
    Quoted,
}

/// One parsed data row: no id, no owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecord {
    pub task_name: String,
    pub description: String,
    pub due_date: String,
    pub priority: String,
}

impl ImportRecord {
    fn from_fields(fields: Vec<String>) -> Self {
        let mut fields = fields.into_iter();
        let mut next = || {
            fields
                .next()
                .filter(|field| !field.is_empty())
                .unwrap_or_else(|| MISSING_FIELD.to_string())
        };
        Self {
            task_name: next(),
            description: next(),
            due_date: next(),
            priority: next(),
        }
    }

    pub fn to_new_task(&self, owner_id: &str) -> NewTask {
        NewTask {
            owner_id: owner_id.to_string(),
            task_name: self.task_name.clone(),
            description: self.description.clone(),
            due_date: self.due_date.clone(),
            priority: Priority::parse_or_default(&self.priority),
            completed: false,
        }
    }
}

/// Parses delimited text: the first line is a header, every later line is a record.
pub fn parse_records(text: &str, splitting: FieldSplitting) -> Vec<ImportRecord> {
    text.lines()
        .skip(1)
        .map(|line| {
            let fields = match splitting {
                FieldSplitting::Plain => line.split(',').map(str::to_string).collect(),
                FieldSplitting::Quoted => split_quoted(line),
            };
            ImportRecord::from_fields(fields)
        })
        .collect()
}

fn split_quoted(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

#[derive(Debug)]
pub enum Submission {
    Submitted(usize),
    Skipped(ClientError),
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub records: Vec<ImportRecord>,
    pub submission: Submission,
}

impl ImportOutcome {
    pub fn submitted(&self) -> Option<usize> {
        match self.submission {
            Submission::Submitted(count) => Some(count),
            Submission::Skipped(_) => None,
        }
    }
}

pub struct Importer<'a> {
    backend: &'a dyn TaskBackend,
    sheets: &'a dyn SheetExporter,
    splitting: FieldSplitting,
}

impl<'a> Importer<'a> {
    pub fn new(backend: &'a dyn TaskBackend, sheets: &'a dyn SheetExporter) -> Self {
        Self {
            backend,
            sheets,
            splitting: FieldSplitting::default(),
        }
    }

    pub fn with_splitting(mut self, splitting: FieldSplitting) -> Self {
        self.splitting = splitting;
        self
    }

    /// Reads the source into records. Validation failures happen before any I/O.
    #[instrument(skip(self))]
    pub async fn read(&self, source: &ImportSource) -> ClientResult<Vec<ImportRecord>> {
        let text = match source {
            ImportSource::SheetLink(link) => {
                let sheet_id = sheet_id_from_link(link)?;
                debug!(sheet_id = %sheet_id, "fetching sheet export");
                self.sheets.export_csv(&sheet_id).await?
            }
            ImportSource::File(file) => {
                if file.content_type != CSV_CONTENT_TYPE {
                    return Err(ClientError::UnsupportedFileType {
                        content_type: file.content_type.clone(),
                    });
                }
                fs::read_to_string(&file.path).map_err(|source| ClientError::FileRead {
                    path: file.path.clone(),
                    source,
                })?
            }
        };

        let records = parse_records(&text, self.splitting);
        debug!(count = records.len(), "parsed import records");
        Ok(records)
    }

    /// Reads the source, then submits the batch for the session owner.
    ///
    /// Records are returned even when submission is skipped or rejected.
    #[instrument(skip(self, session))]
    pub async fn run(&self, source: &ImportSource, session: &Session) -> ClientResult<ImportOutcome> {
        let records = self.read(source).await?;

        let owner_id = match session.resolve_owner_id() {
            Ok(owner_id) => owner_id,
            Err(err) => {
                warn!(error = %err, "import not submitted: no usable session");
                return Ok(ImportOutcome {
                    records,
                    submission: Submission::Skipped(err),
                });
            }
        };

        let batch: Vec<NewTask> = records.iter().map(|r| r.to_new_task(&owner_id)).collect();
        let submission = match self.backend.import_tasks(&batch).await {
            Ok(()) => {
                info!(count = batch.len(), "tasks imported");
                Submission::Submitted(batch.len())
            }
            Err(err) => {
                warn!(error = %err, "import submission failed");
                Submission::Skipped(err)
            }
        };

        Ok(ImportOutcome {
            records,
            submission,
        })
    }
}
