use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{Local, NaiveDate};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::import::ImportRecord;
use crate::table::{Column, TaskTable};
use crate::task::Task;

const NO_RECORDS: &str = "No matching records found";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    /// Prints the current page of the table with its pager line.
    #[tracing::instrument(skip_all)]
    pub fn print_table_page(&self, table: &TaskTable) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let today = Local::now().date_naive();
        self.write_table_page(&mut out, table, today, io::stdout().is_terminal())
    }

    pub fn write_table_page<W: Write>(
        &self,
        mut out: W,
        table: &TaskTable,
        today: NaiveDate,
        tty: bool,
    ) -> anyhow::Result<()> {
        let headers: Vec<String> = Column::ALL
            .iter()
            .map(|column| {
                let marker = match table.sort() {
                    Some(spec) if spec.column == *column => match spec.direction {
                        crate::table::SortDirection::Ascending => " ^",
                        crate::table::SortDirection::Descending => " v",
                    },
                    _ => "",
                };
                format!("{}{marker}", column.header())
            })
            .collect();

        let page = table.sorted_paged_view();
        if page.is_empty() {
            writeln!(out, "{NO_RECORDS}")?;
        } else {
            let rows = page
                .iter()
                .map(|task| self.task_row(task, today, tty))
                .collect();
            write_table(&mut out, headers, rows)?;
        }

        writeln!(
            out,
            "Page {} of {}  ({} matching, {} total)",
            table.page_index() + 1,
            table.page_count().max(1),
            table.filtered_count(),
            table.tasks().len()
        )?;
        if !table.search_term().is_empty() {
            writeln!(out, "Search: {}", table.search_term())?;
        }
        Ok(())
    }

    fn task_row(&self, task: &Task, today: NaiveDate, tty: bool) -> Vec<String> {
        let due = match task.due() {
            Some(due) if due < today && !task.completed => self.paint(&task.due_date, "31", tty),
            _ => task.due_date.clone(),
        };
        let status = if task.completed {
            self.paint("Completed", "32", tty)
        } else {
            self.paint("Pending", "31", tty)
        };

        vec![
            self.paint(&task.id, "33", tty),
            task.task_name.clone(),
            task.description.clone(),
            due,
            task.priority.to_string(),
            status,
        ]
    }

    #[tracing::instrument(skip_all)]
    pub fn print_import_records(&self, records: &[ImportRecord]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if records.is_empty() {
            writeln!(out, "{NO_RECORDS}")?;
            return Ok(());
        }

        let headers = vec![
            "Task Name".to_string(),
            "Description".to_string(),
            "Due Date".to_string(),
            "Priority".to_string(),
        ];
        let rows = records
            .iter()
            .map(|r| {
                vec![
                    r.task_name.clone(),
                    r.description.clone(),
                    r.due_date.clone(),
                    r.priority.clone(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "owner       {}", task.owner_id)?;
        writeln!(out, "name        {}", task.task_name)?;
        writeln!(out, "description {}", task.description)?;
        writeln!(out, "due         {}", task.due_date)?;
        writeln!(out, "priority    {}", task.priority)?;
        writeln!(
            out,
            "status      {}",
            if task.completed { "Completed" } else { "Pending" }
        )?;

        Ok(())
    }

    fn paint(&self, text: &str, code: &str, tty: bool) -> String {
        if !self.color || !tty {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{Renderer, strip_ansi};
    use crate::api::TaskBackend;
    use crate::error::{ClientError, ClientResult};
    use crate::table::TaskTable;
    use crate::task::{NewTask, Task};

    struct Offline;

    #[async_trait]
    impl TaskBackend for Offline {
        async fn list_tasks(&self, _owner_id: Option<&str>) -> ClientResult<Vec<Task>> {
            Err(ClientError::network("offline"))
        }
        async fn create_task(&self, _task: &NewTask) -> ClientResult<Task> {
            Err(ClientError::network("offline"))
        }
        async fn import_tasks(&self, _tasks: &[NewTask]) -> ClientResult<()> {
            Err(ClientError::network("offline"))
        }
        async fn update_task(&self, _task: &Task) -> ClientResult<Option<Task>> {
            Err(ClientError::network("offline"))
        }
        async fn complete_task(&self, _id: &str) -> ClientResult<()> {
            Err(ClientError::network("offline"))
        }
        async fn delete_task(&self, _id: &str) -> ClientResult<()> {
            Err(ClientError::network("offline"))
        }
    }

    fn render(table: &TaskTable) -> String {
        let mut buf = Vec::new();
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        Renderer::plain()
            .write_table_page(&mut buf, table, today, false)
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn empty_table_renders_placeholder_and_pager() {
        let table = TaskTable::new(Arc::new(Offline));
        let text = render(&table);
        assert!(text.contains("No matching records found"));
        assert!(text.contains("Page 1 of 1"));
    }

    #[test]
    fn rows_are_aligned_with_status_text() {
        let task: Task = serde_json::from_value(json!({
            "_id": "a1",
            "taskName": "Buy milk",
            "description": "Get 2%",
            "dueDate": "2024-01-01",
            "priority": "High",
            "completed": true
        }))
        .unwrap();
        let table = TaskTable::with_tasks(Arc::new(Offline), vec![task]);
        let text = render(&table);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("ID "));
        assert!(lines[0].contains("Task Status"));
        assert!(lines[2].contains("Buy milk"));
        assert!(lines[2].contains("Completed"));
        assert!(text.contains("Page 1 of 1  (1 matching, 1 total)"));
    }

    #[test]
    fn strip_ansi_removes_escape_sequences() {
        assert_eq!(strip_ansi("\x1b[31mlate\x1b[0m"), "late");
    }
}
