use std::io::{self, Write};

use anyhow::anyhow;
use tracing::{info, instrument, warn};

use super::{AlwaysConfirm, Context, StdinConfirm};
use crate::cli::BrowseArgs;
use crate::table::{Column, Confirm, TaskTable};
use crate::task::{Priority, TaskEdit};

const HELP: &str = "\
commands:
  / TEXT           search (a bare / clears the search)
  sort COLUMN      cycle sort on id|name|description|due|priority|status
  n | p            next / previous page
  show ID          print one task
  done ID          mark a task completed
  del ID           delete a task
  edit ID FIELD VALUE
                   FIELD is name|description|due|priority|completed
  reload           re-fetch the task list
  q                quit";

#[derive(Debug, Clone, PartialEq, Eq)]
enum BrowseCommand {
    Search(String),
    Sort(Column),
    Next,
    Previous,
    Show(String),
    Done(String),
    Delete(String),
    Edit { id: String, edit: EditField },
    Reload,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EditField {
    Name(String),
    Description(String),
    Due(String),
    Priority(Priority),
    Completed(bool),
}

impl EditField {
    fn into_edit(self) -> TaskEdit {
        let mut edit = TaskEdit::default();
        match self {
            EditField::Name(value) => edit.task_name = Some(value),
            EditField::Description(value) => edit.description = Some(value),
            EditField::Due(value) => edit.due_date = Some(value),
            EditField::Priority(value) => edit.priority = Some(value),
            EditField::Completed(value) => edit.completed = Some(value),
        }
        edit
    }
}

fn parse_command(line: &str) -> anyhow::Result<BrowseCommand> {
    let line = line.trim();
    if let Some(term) = line.strip_prefix('/') {
        return Ok(BrowseCommand::Search(term.trim().to_string()));
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let require_id = |what: &str| {
        if rest.is_empty() {
            Err(anyhow!("{what} needs a task id"))
        } else {
            Ok(rest.to_string())
        }
    };

    match word {
        "" | "h" | "help" | "?" => Ok(BrowseCommand::Help),
        "q" | "quit" | "exit" => Ok(BrowseCommand::Quit),
        "n" | "next" => Ok(BrowseCommand::Next),
        "p" | "prev" | "previous" => Ok(BrowseCommand::Previous),
        "reload" => Ok(BrowseCommand::Reload),
        "search" => Ok(BrowseCommand::Search(rest.to_string())),
        "sort" => Ok(BrowseCommand::Sort(rest.parse()?)),
        "show" => Ok(BrowseCommand::Show(require_id("show")?)),
        "done" => Ok(BrowseCommand::Done(require_id("done")?)),
        "del" | "delete" => Ok(BrowseCommand::Delete(require_id("del")?)),
        "edit" => parse_edit(rest),
        other => Err(anyhow!("unknown command {other:?}; type help")),
    }
}

fn parse_edit(rest: &str) -> anyhow::Result<BrowseCommand> {
    let mut parts = rest.splitn(3, char::is_whitespace);
    let (Some(id), Some(field), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(anyhow!("usage: edit ID FIELD VALUE"));
    };
    let value = value.trim().to_string();

    let edit = match field.to_ascii_lowercase().as_str() {
        "name" => EditField::Name(value),
        "description" | "desc" => EditField::Description(value),
        "due" => EditField::Due(value),
        "priority" => EditField::Priority(value.parse()?),
        "completed" | "status" => EditField::Completed(
            value
                .parse()
                .map_err(|_| anyhow!("completed must be true or false"))?,
        ),
        other => return Err(anyhow!("unknown field {other:?}")),
    };

    Ok(BrowseCommand::Edit {
        id: id.to_string(),
        edit,
    })
}

#[instrument(skip_all, fields(all = args.all))]
pub(super) async fn cmd_browse(ctx: &Context, args: BrowseArgs) -> anyhow::Result<()> {
    info!("command browse");
    let mut table = ctx.table();
    reload(ctx, &mut table, args.all).await?;
    ctx.renderer.print_table_page(&table)?;
    println!("type help for commands");

    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };

        if command == BrowseCommand::Quit {
            break;
        }
        if let Err(err) = apply(ctx, &mut table, command, args.all).await {
            warn!(error = %err, "browse command failed");
            println!("error: {err:#}");
        }
    }

    Ok(())
}

/// Rows already shown as completed are not sent again.
fn shown_completed(table: &TaskTable, id: &str) -> bool {
    table.task(id).is_some_and(|task| task.completed)
}

async fn reload(ctx: &Context, table: &mut TaskTable, all: bool) -> anyhow::Result<()> {
    if all {
        table.refresh_all().await?;
    } else {
        table.refresh(&ctx.session).await?;
    }
    Ok(())
}

async fn apply(
    ctx: &Context,
    table: &mut TaskTable,
    command: BrowseCommand,
    all: bool,
) -> anyhow::Result<()> {
    match command {
        BrowseCommand::Help => {
            println!("{HELP}");
            return Ok(());
        }
        BrowseCommand::Quit => return Ok(()),
        BrowseCommand::Show(id) => {
            let task = table
                .task(&id)
                .ok_or_else(|| anyhow!("task not found: {id}"))?;
            ctx.renderer.print_task_info(task)?;
            return Ok(());
        }
        BrowseCommand::Search(term) => table.set_search_term(term),
        BrowseCommand::Sort(column) => table.toggle_sort(column),
        BrowseCommand::Next => table.next_page(),
        BrowseCommand::Previous => table.previous_page(),
        BrowseCommand::Reload => reload(ctx, table, all).await?,
        BrowseCommand::Done(id) => {
            if shown_completed(table, &id) {
                println!("Task {id} is already completed.");
            } else {
                table.mark_complete(&id).await?;
            }
        }
        BrowseCommand::Delete(id) => {
            let mut confirm: Box<dyn Confirm> = if ctx.cfg.confirmation() {
                Box::new(StdinConfirm)
            } else {
                Box::new(AlwaysConfirm)
            };
            table.delete_task(&id, confirm.as_mut()).await?;
        }
        BrowseCommand::Edit { id, edit } => {
            let mut record = table
                .task(&id)
                .cloned()
                .ok_or_else(|| anyhow!("task not found: {id}"))?;
            edit.into_edit().apply(&mut record);
            table.replace_task(record).await?;
        }
    }

    ctx.renderer.print_table_page(table)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::{BrowseCommand, EditField, parse_command, shown_completed};
    use crate::api::TaskBackend;
    use crate::error::ClientResult;
    use crate::table::{Column, TaskTable};
    use crate::task::{NewTask, Priority, Task};

    struct Offline;

    #[async_trait]
    impl TaskBackend for Offline {
        async fn list_tasks(&self, _owner_id: Option<&str>) -> ClientResult<Vec<Task>> {
            unreachable!("offline")
        }
        async fn create_task(&self, _task: &NewTask) -> ClientResult<Task> {
            unreachable!("offline")
        }
        async fn import_tasks(&self, _tasks: &[NewTask]) -> ClientResult<()> {
            unreachable!("offline")
        }
        async fn update_task(&self, _task: &Task) -> ClientResult<Option<Task>> {
            unreachable!("offline")
        }
        async fn complete_task(&self, _id: &str) -> ClientResult<()> {
            unreachable!("offline")
        }
        async fn delete_task(&self, _id: &str) -> ClientResult<()> {
            unreachable!("offline")
        }
    }

    fn row(id: &str, completed: bool) -> Task {
        serde_json::from_value(json!({
            "_id": id,
            "taskName": "t",
            "description": "d",
            "dueDate": "2024-01-01",
            "priority": "Low",
            "completed": completed
        }))
        .unwrap()
    }

    #[test]
    fn done_skips_rows_already_completed() {
        let table = TaskTable::with_tasks(
            Arc::new(Offline),
            vec![row("open", false), row("closed", true)],
        );
        assert!(shown_completed(&table, "closed"));
        assert!(!shown_completed(&table, "open"));
        assert!(!shown_completed(&table, "unknown"));
    }

    #[test]
    fn parses_navigation_and_search() {
        assert_eq!(parse_command("n").unwrap(), BrowseCommand::Next);
        assert_eq!(parse_command(" prev ").unwrap(), BrowseCommand::Previous);
        assert_eq!(
            parse_command("/ buy milk").unwrap(),
            BrowseCommand::Search("buy milk".to_string())
        );
        assert_eq!(
            parse_command("/").unwrap(),
            BrowseCommand::Search(String::new())
        );
        assert_eq!(
            parse_command("sort due").unwrap(),
            BrowseCommand::Sort(Column::DueDate)
        );
        assert_eq!(parse_command("").unwrap(), BrowseCommand::Help);
    }

    #[test]
    fn row_actions_need_an_id() {
        assert!(parse_command("done").is_err());
        assert_eq!(
            parse_command("del abc").unwrap(),
            BrowseCommand::Delete("abc".to_string())
        );
    }

    #[test]
    fn edit_takes_field_and_value() {
        assert_eq!(
            parse_command("edit abc name Buy oat milk").unwrap(),
            BrowseCommand::Edit {
                id: "abc".to_string(),
                edit: EditField::Name("Buy oat milk".to_string()),
            }
        );
        assert_eq!(
            parse_command("edit abc priority high").unwrap(),
            BrowseCommand::Edit {
                id: "abc".to_string(),
                edit: EditField::Priority(Priority::High),
            }
        );
        assert!(parse_command("edit abc completed maybe").is_err());
        assert!(parse_command("edit abc").is_err());
        assert!(parse_command("frobnicate").is_err());
    }
}
