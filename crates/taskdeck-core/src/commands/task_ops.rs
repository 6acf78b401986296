use anyhow::{Context as _, anyhow};
use tracing::{debug, info, instrument};

use super::{AlwaysConfirm, Context, StdinConfirm};
use crate::cli::{AddArgs, DeleteArgs, EditArgs, IdArgs, ImportArgs, ListArgs};
use crate::import::{ImportSource, Importer, LocalFile, Submission};
use crate::session::Session;
use crate::table::{Confirm, DeleteOutcome, TaskTable};
use crate::task::{TaskEdit, TaskForm};

#[instrument(skip_all)]
pub(super) async fn cmd_add(ctx: &Context, args: AddArgs) -> anyhow::Result<()> {
    info!("command add");
    let form = TaskForm {
        task_name: args.task_name,
        description: args.description,
        due_date: args.due_date,
        priority: args.priority,
        completed: args.completed,
    };

    let mut table = ctx.table();
    let created = table.add_task(&ctx.session, form).await?;
    ctx.renderer.print_task_info(&created)?;
    Ok(())
}

#[instrument(skip_all, fields(page = args.page, all = args.all))]
pub(super) async fn cmd_list(ctx: &Context, args: ListArgs) -> anyhow::Result<()> {
    info!("command list");
    if args.page == 0 {
        return Err(anyhow!("pages are numbered from 1"));
    }

    let mut table = ctx.table();
    if args.all {
        table.refresh_all().await?;
    } else {
        table.refresh(&ctx.session).await?;
    }

    table.set_sort(args.sort);
    if let Some(search) = args.search {
        table.set_search_term(search);
    }
    table.set_page_index(args.page - 1);
    debug!(
        filtered = table.filtered_count(),
        pages = table.page_count(),
        "table prepared"
    );

    ctx.renderer.print_table_page(&table)
}

#[instrument(skip_all, fields(id = %args.id))]
pub(super) async fn cmd_edit(ctx: &Context, args: EditArgs) -> anyhow::Result<()> {
    info!("command edit");
    let edit = TaskEdit {
        task_name: args.task_name,
        description: args.description,
        due_date: args.due_date,
        priority: args.priority,
        completed: args.completed,
    };
    if edit.is_empty() {
        return Err(anyhow!(
            "edit needs at least one of --name, --description, --due, --priority, --completed"
        ));
    }

    let mut table = ctx.table();
    table.refresh(&ctx.session).await?;
    let mut record = table
        .task(&args.id)
        .cloned()
        .ok_or_else(|| anyhow!("task not found: {}", args.id))?;
    edit.apply(&mut record);

    let updated = table
        .replace_task(record)
        .await
        .with_context(|| format!("failed to update task {}", args.id))?;
    ctx.renderer.print_task_info(&updated)?;
    Ok(())
}

#[instrument(skip_all, fields(id = %args.id))]
pub(super) async fn cmd_done(ctx: &Context, args: IdArgs) -> anyhow::Result<()> {
    info!("command done");
    let mut table = ctx.table();
    table.mark_complete(&args.id).await?;
    Ok(())
}

#[instrument(skip_all, fields(id = %args.id, yes = args.yes))]
pub(super) async fn cmd_delete(ctx: &Context, args: DeleteArgs) -> anyhow::Result<()> {
    info!("command delete");
    let mut table = ctx.table();
    let mut confirm: Box<dyn Confirm> = if args.yes || !ctx.cfg.confirmation() {
        Box::new(AlwaysConfirm)
    } else {
        Box::new(StdinConfirm)
    };

    if delete_loaded(&mut table, &ctx.session, &args.id, confirm.as_mut()).await?
        == DeleteOutcome::Cancelled
    {
        println!("Delete cancelled.");
    }
    Ok(())
}

/// Loads the owner's list first so the removal count reflects real rows.
async fn delete_loaded(
    table: &mut TaskTable,
    session: &Session,
    id: &str,
    confirm: &mut dyn Confirm,
) -> anyhow::Result<DeleteOutcome> {
    table.refresh(session).await?;
    Ok(table.delete_task(id, confirm).await?)
}

#[instrument(skip_all)]
pub(super) async fn cmd_import(ctx: &Context, args: ImportArgs) -> anyhow::Result<()> {
    info!("command import");
    let source = ImportSource::from_parts(args.link, args.file.map(LocalFile::from_path))?;

    let backend = ctx.backend.as_ref();
    let importer = Importer::new(backend, backend).with_splitting(ctx.cfg.field_splitting());
    let mut table = ctx.table();
    let outcome = table.import(&importer, &source, &ctx.session).await?;

    ctx.renderer.print_import_records(&outcome.records)?;
    match outcome.submission {
        Submission::Submitted(_) => Ok(()),
        Submission::Skipped(err) if err.is_session_error() => {
            Err(anyhow!(err).context("imported rows were not saved; run `taskdeck login` first"))
        }
        Submission::Skipped(err) => {
            Err(anyhow!(err).context("imported rows were not saved to the backend"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;
    use tempfile::tempdir;

    use super::delete_loaded;
    use crate::api::TaskBackend;
    use crate::error::ClientResult;
    use crate::session::Session;
    use crate::table::{DeleteOutcome, TableEvent, TaskTable};
    use crate::task::{NewTask, Task};

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskBackend for Recording {
        async fn list_tasks(&self, owner_id: Option<&str>) -> ClientResult<Vec<Task>> {
            self.calls.lock().unwrap().push("GET".to_string());
            let task: Task = serde_json::from_value(json!({
                "_id": "t1",
                "userId": owner_id.unwrap_or_default(),
                "taskName": "Buy milk",
                "description": "2%",
                "dueDate": "2024-01-01",
                "priority": "Low",
                "completed": false
            }))
            .unwrap();
            Ok(vec![task])
        }

        async fn create_task(&self, _task: &NewTask) -> ClientResult<Task> {
            unreachable!("not used")
        }

        async fn import_tasks(&self, _tasks: &[NewTask]) -> ClientResult<()> {
            unreachable!("not used")
        }

        async fn update_task(&self, _task: &Task) -> ClientResult<Option<Task>> {
            unreachable!("not used")
        }

        async fn complete_task(&self, _id: &str) -> ClientResult<()> {
            unreachable!("not used")
        }

        async fn delete_task(&self, id: &str) -> ClientResult<()> {
            self.calls.lock().unwrap().push(format!("DELETE {id}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn delete_reports_the_rows_it_removed() {
        let temp = tempdir().unwrap();
        let session = Session::open(temp.path()).unwrap();
        let payload = URL_SAFE_NO_PAD.encode(json!({"user": {"id": "u1"}}).to_string());
        session.store_login(&format!("h.{payload}.s")).unwrap();

        let backend = Arc::new(Recording::default());
        let mut table = TaskTable::new(backend.clone());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        table.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        let outcome = delete_loaded(&mut table, &session, "t1", &mut |_: &str| true)
            .await
            .unwrap();

        assert_eq!(outcome, DeleteOutcome::Deleted { removed: 1 });
        assert_eq!(*backend.calls.lock().unwrap(), vec!["GET", "DELETE t1"]);
        assert_eq!(
            events.lock().unwrap().last(),
            Some(&TableEvent::Removed {
                id: "t1".to_string(),
                count: 1
            })
        );
    }
}
