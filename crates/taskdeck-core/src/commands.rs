mod auth;
mod browse;
mod task_ops;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::api::{HttpBackend, TaskBackend};
use crate::cli::Command;
use crate::config::Config;
use crate::render::Renderer;
use crate::session::Session;
use crate::table::{Confirm, TableEvent, TaskTable};

/// Everything a command needs, built once per invocation.
pub struct Context {
    pub cfg: Config,
    pub session: Session,
    pub backend: Arc<HttpBackend>,
    pub renderer: Renderer,
}

impl Context {
    /// A table wired to the backend with user-facing notices attached.
    pub fn table(&self) -> TaskTable {
        let backend: Arc<dyn TaskBackend> = self.backend.clone();
        let mut table = TaskTable::new(backend);
        table.subscribe(print_notice);
        table
    }
}

#[instrument(skip_all)]
pub async fn dispatch(ctx: &Context, command: Command) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Signup(args) => auth::cmd_signup(ctx, args).await,
        Command::Login(args) => auth::cmd_login(ctx, args).await,
        Command::Logout => auth::cmd_logout(ctx),
        Command::Whoami => auth::cmd_whoami(ctx),
        Command::Add(args) => task_ops::cmd_add(ctx, args).await,
        Command::List(args) => task_ops::cmd_list(ctx, args).await,
        Command::Edit(args) => task_ops::cmd_edit(ctx, args).await,
        Command::Done(args) => task_ops::cmd_done(ctx, args).await,
        Command::Delete(args) => task_ops::cmd_delete(ctx, args).await,
        Command::Import(args) => task_ops::cmd_import(ctx, args).await,
        Command::Browse(args) => browse::cmd_browse(ctx, args).await,
    }
}

fn print_notice(event: &TableEvent) {
    match event {
        TableEvent::Loaded { .. } => {}
        TableEvent::Added { id } => println!("Task added successfully! ({id})"),
        TableEvent::Updated { id } => println!("Task {id} updated."),
        TableEvent::Completed { id } => println!("Task {id} marked completed."),
        TableEvent::Removed { id, count: 0 } => {
            println!("Delete request sent for {id}; it was not in the local list.")
        }
        TableEvent::Removed { id, .. } => println!("Task {id} deleted."),
        TableEvent::Imported { count } => println!("Tasks successfully saved! ({count} imported)"),
    }
}

/// Asks on stdin; anything but y/yes declines.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        print!("{prompt} [y/N] ");
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

/// Used when confirmation is disabled or `--yes` was given.
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm(&mut self, _prompt: &str) -> bool {
        true
    }
}
