use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info, instrument, warn};

use crate::api::TaskBackend;
use crate::error::ClientResult;
use crate::import::{ImportOutcome, ImportSource, Importer};
use crate::session::Session;
use crate::task::{Task, TaskForm};

pub const PAGE_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    TaskName,
    Description,
    DueDate,
    Priority,
    Completed,
}

impl Column {
    pub const ALL: [Column; 6] = [
        Column::Id,
        Column::TaskName,
        Column::Description,
        Column::DueDate,
        Column::Priority,
        Column::Completed,
    ];

    pub fn header(self) -> &'static str {
        match self {
            Column::Id => "ID",
            Column::TaskName => "Task Name",
            Column::Description => "Description",
            Column::DueDate => "Due Date",
            Column::Priority => "Priority",
            Column::Completed => "Task Status",
        }
    }

    fn compare(self, a: &Task, b: &Task) -> Ordering {
        match self {
            Column::Id => a.id.to_lowercase().cmp(&b.id.to_lowercase()),
            Column::TaskName => a.task_name.to_lowercase().cmp(&b.task_name.to_lowercase()),
            Column::Description => a
                .description
                .to_lowercase()
                .cmp(&b.description.to_lowercase()),
            Column::DueDate => {
                let key = |t: &Task| {
                    let due = t.due();
                    (due.is_none(), due, t.due_date.to_lowercase())
                };
                key(a).cmp(&key(b))
            }
            Column::Priority => a.priority.cmp(&b.priority),
            Column::Completed => a.completed.cmp(&b.completed),
        }
    }
}

impl FromStr for Column {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "id" => Ok(Column::Id),
            "name" | "taskname" | "task" => Ok(Column::TaskName),
            "desc" | "description" => Ok(Column::Description),
            "due" | "duedate" | "date" => Ok(Column::DueDate),
            "priority" | "pri" => Ok(Column::Priority),
            "status" | "completed" | "taskstatus" | "done" => Ok(Column::Completed),
            _ => Err(anyhow!("unknown column {s:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub column: Column,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn ascending(column: Column) -> Self {
        Self {
            column,
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(column: Column) -> Self {
        Self {
            column,
            direction: SortDirection::Descending,
        }
    }
}

impl FromStr for SortSpec {
    type Err = anyhow::Error;

    /// `column`, `column:asc` or `column:desc`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, direction) = match s.split_once(':') {
            Some((column, direction)) => (column, direction.trim().to_ascii_lowercase()),
            None => (s, "asc".to_string()),
        };
        let column: Column = column.parse()?;
        match direction.as_str() {
            "asc" | "ascending" => Ok(SortSpec::ascending(column)),
            "desc" | "descending" => Ok(SortSpec::descending(column)),
            other => Err(anyhow!("unknown sort direction {other:?}; use asc or desc")),
        }
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.direction {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        };
        write!(f, "{} {arrow}", self.column.header())
    }
}

/// Change notifications for whoever renders the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableEvent {
    Loaded { count: usize },
    Added { id: String },
    Updated { id: String },
    Completed { id: String },
    Removed { id: String, count: usize },
    Imported { count: usize },
}

pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&str) -> bool,
{
    fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this record?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Cancelled,
    Deleted { removed: usize },
}

type Listener = Box<dyn FnMut(&TableEvent)>;

/// The canonical task list of the session plus the derived table view.
///
/// Local state only changes after the backend reports success.
pub struct TaskTable {
    backend: Arc<dyn TaskBackend>,
    all_tasks: Vec<Task>,
    search_term: String,
    sort: Option<SortSpec>,
    page_index: usize,
    listeners: Vec<Listener>,
}

impl fmt::Debug for TaskTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskTable")
            .field("tasks", &self.all_tasks.len())
            .field("search_term", &self.search_term)
            .field("sort", &self.sort)
            .field("page_index", &self.page_index)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl TaskTable {
    pub fn new(backend: Arc<dyn TaskBackend>) -> Self {
        Self::with_tasks(backend, Vec::new())
    }

    pub fn with_tasks(backend: Arc<dyn TaskBackend>, tasks: Vec<Task>) -> Self {
        Self {
            backend,
            all_tasks: tasks,
            search_term: String::new(),
            sort: None,
            page_index: 0,
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&TableEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn emit(&mut self, event: TableEvent) {
        debug!(?event, "table event");
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.all_tasks
    }

    /// Last task with this id; ids are not deduplicated.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.all_tasks.iter().rev().find(|task| task.id == id)
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn sort(&self) -> Option<SortSpec> {
        self.sort
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    /// Updates the search term and pulls the page index back onto the last page.
    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.search_term = term.into();
        self.clamp_page_index();
    }

    pub fn set_sort(&mut self, sort: Option<SortSpec>) {
        self.sort = sort;
    }

    /// Cycles the column through ascending, descending and unsorted.
    pub fn toggle_sort(&mut self, column: Column) {
        self.sort = match self.sort {
            Some(spec) if spec.column == column => match spec.direction {
                SortDirection::Ascending => Some(SortSpec::descending(column)),
                SortDirection::Descending => None,
            },
            _ => Some(SortSpec::ascending(column)),
        };
    }

    /// Jumps to a page. Pages past the end render empty.
    pub fn set_page_index(&mut self, page_index: usize) {
        self.page_index = page_index;
    }

    pub fn filtered_view(&self) -> Vec<&Task> {
        let needle = self.search_term.to_lowercase();
        self.all_tasks
            .iter()
            .filter(|task| needle.is_empty() || task.search_haystack().contains(&needle))
            .collect()
    }

    pub fn filtered_count(&self) -> usize {
        self.filtered_view().len()
    }

    pub fn sorted_view(&self) -> Vec<&Task> {
        let mut rows = self.filtered_view();
        if let Some(spec) = self.sort {
            match spec.direction {
                SortDirection::Ascending => rows.sort_by(|a, b| spec.column.compare(a, b)),
                SortDirection::Descending => rows.sort_by(|a, b| spec.column.compare(b, a)),
            }
        }
        rows
    }

    pub fn sorted_paged_view(&self) -> Vec<&Task> {
        let start = self.page_index.saturating_mul(PAGE_SIZE);
        self.sorted_view()
            .into_iter()
            .skip(start)
            .take(PAGE_SIZE)
            .collect()
    }

    pub fn page_count(&self) -> usize {
        self.filtered_count().div_ceil(PAGE_SIZE)
    }

    pub fn can_previous_page(&self) -> bool {
        self.page_index > 0
    }

    pub fn can_next_page(&self) -> bool {
        self.page_index.saturating_add(1).saturating_mul(PAGE_SIZE) < self.filtered_count()
    }

    pub fn previous_page(&mut self) {
        if self.can_previous_page() {
            self.page_index -= 1;
        }
    }

    pub fn next_page(&mut self) {
        if self.can_next_page() {
            self.page_index += 1;
        }
    }

    fn clamp_page_index(&mut self) {
        let last = self.page_count().saturating_sub(1);
        if self.page_index > last {
            debug!(from = self.page_index, to = last, "clamping page index");
            self.page_index = last;
        }
    }

    fn load(&mut self, tasks: Vec<Task>) {
        let count = tasks.len();
        self.all_tasks = tasks;
        self.clamp_page_index();
        info!(count, "task list loaded");
        self.emit(TableEvent::Loaded { count });
    }

    /// Re-fetches the session owner's tasks.
    #[instrument(skip_all)]
    pub async fn refresh(&mut self, session: &Session) -> ClientResult<()> {
        let owner_id = session.resolve_owner_id()?;
        let tasks = self.backend.list_tasks(Some(&owner_id)).await?;
        self.load(tasks);
        Ok(())
    }

    /// Re-fetches every task the backend exposes, regardless of owner.
    #[instrument(skip_all)]
    pub async fn refresh_all(&mut self) -> ClientResult<()> {
        let tasks = self.backend.list_tasks(None).await?;
        self.load(tasks);
        Ok(())
    }

    #[instrument(skip_all, fields(task_name = %form.task_name))]
    pub async fn add_task(&mut self, session: &Session, form: TaskForm) -> ClientResult<Task> {
        let owner_id = session.resolve_owner_id()?;
        form.validate()?;

        let created = self
            .backend
            .create_task(&form.into_new_task(owner_id))
            .await?;
        self.all_tasks.push(created.clone());
        self.emit(TableEvent::Added {
            id: created.id.clone(),
        });
        Ok(created)
    }

    /// Sets `completed` on the server, then on every local copy. Idempotent.
    #[instrument(skip(self))]
    pub async fn mark_complete(&mut self, id: &str) -> ClientResult<()> {
        if let Err(err) = self.backend.complete_task(id).await {
            warn!(id, error = %err, "mark complete failed");
            return Err(err);
        }

        let mut patched = 0usize;
        for task in self.all_tasks.iter_mut().filter(|task| task.id == id) {
            task.completed = true;
            patched += 1;
        }
        debug!(id, patched, "completed flag applied locally");
        self.emit(TableEvent::Completed { id: id.to_string() });
        Ok(())
    }

    #[instrument(skip(self, confirm))]
    pub async fn delete_task(
        &mut self,
        id: &str,
        confirm: &mut dyn Confirm,
    ) -> ClientResult<DeleteOutcome> {
        if !confirm.confirm(DELETE_PROMPT) {
            debug!(id, "delete cancelled");
            return Ok(DeleteOutcome::Cancelled);
        }

        if let Err(err) = self.backend.delete_task(id).await {
            warn!(id, error = %err, "delete failed");
            return Err(err);
        }

        let before = self.all_tasks.len();
        self.all_tasks.retain(|task| task.id != id);
        let removed = before - self.all_tasks.len();
        self.clamp_page_index();
        self.emit(TableEvent::Removed {
            id: id.to_string(),
            count: removed,
        });
        Ok(DeleteOutcome::Deleted { removed })
    }

    /// Full-record update; local copies with the same id are replaced.
    #[instrument(skip_all, fields(id = %record.id))]
    pub async fn replace_task(&mut self, record: Task) -> ClientResult<Task> {
        record.validate()?;
        let returned = match self.backend.update_task(&record).await {
            Ok(returned) => returned,
            Err(err) => {
                warn!(error = %err, "update failed");
                return Err(err);
            }
        };

        let updated = returned
            .filter(|task| task.id == record.id)
            .unwrap_or(record);
        for task in self.all_tasks.iter_mut().filter(|task| task.id == updated.id) {
            *task = updated.clone();
        }
        self.emit(TableEvent::Updated {
            id: updated.id.clone(),
        });
        Ok(updated)
    }

    /// Runs an import and re-fetches the list once the batch is accepted.
    #[instrument(skip_all)]
    pub async fn import(
        &mut self,
        importer: &Importer<'_>,
        source: &ImportSource,
        session: &Session,
    ) -> ClientResult<ImportOutcome> {
        let outcome = importer.run(source, session).await?;
        if let Some(count) = outcome.submitted() {
            if let Err(err) = self.refresh(session).await {
                warn!(error = %err, "re-fetch after import failed");
            }
            self.emit(TableEvent::Imported { count });
        }
        Ok(outcome)
    }
}
