use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use todo_core::{
    notifications::LocalScheduler,
    settings::FileSettingsStore,
    store::DEFAULT_SETTINGS_KEY,
    PersistPolicy, TodoStore,
};
use tracing::{info, warn};

use crate::command::{self, Command, HELP};

const DELETE_PROMPT: &str = "Are you sure you want to delete this item? [y/N] ";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) data_dir: PathBuf,
    pub(crate) persist_policy: PersistPolicy,
    pub(crate) settings_key: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("TODO_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(policy) = std::env::var("TODO_PERSIST") {
            match policy.trim().to_ascii_lowercase().as_str() {
                "manual" | "exit" => config.persist_policy = PersistPolicy::Manual,
                "eager" | "always" => config.persist_policy = PersistPolicy::AfterEachMutation,
                other => warn!(value = other, "ignoring unknown TODO_PERSIST value"),
            }
        }
        if let Ok(key) = std::env::var("TODO_SETTINGS_KEY") {
            let key = key.trim();
            if !key.is_empty() {
                config.settings_key = key.to_string();
            }
        }
        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .map(|dir| dir.join("todo"))
                .unwrap_or_else(|| PathBuf::from(".todo")),
            persist_policy: PersistPolicy::Manual,
            settings_key: DEFAULT_SETTINGS_KEY.to_string(),
        }
    }
}

/// Line-oriented view over a [`TodoStore`]. Reminders that came due are
/// printed before every prompt; the list is saved when the session ends.
pub struct Session<R, W> {
    store: TodoStore,
    scheduler: LocalScheduler,
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Session<R, W> {
    pub fn new(store: TodoStore, scheduler: LocalScheduler, input: R, output: W) -> Self {
        Self {
            store,
            scheduler,
            input,
            output,
        }
    }

    pub fn store(&self) -> &TodoStore {
        &self.store
    }

    /// Runs until `quit`, end of input or a terminal error. The list is
    /// saved on every one of those exits.
    pub fn run(&mut self) -> Result<()> {
        let result = self.event_loop();
        self.teardown();
        result
    }

    fn event_loop(&mut self) -> Result<()> {
        loop {
            self.deliver_due_reminders()?;
            write!(self.output, "> ")?;
            self.output.flush()?;
            let Some(line) = self.read_line()? else {
                break;
            };
            let today = Local::now().date_naive();
            match command::parse(&line, today, &Local) {
                Ok(None) => continue,
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => self.dispatch(command)?,
                Err(err) => writeln!(self.output, "error: {err}")?,
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Add {
                name,
                time,
                priority,
            } => match self.store.add(&name, time, priority) {
                Ok(item) => writeln!(
                    self.output,
                    "Added \"{}\" at {} [{}]",
                    item.name,
                    item.display_time(),
                    item.priority
                )?,
                Err(err) => writeln!(self.output, "error: {err}")?,
            },
            Command::List => self.print_list()?,
            Command::Delete { index } => self.confirm_delete(index)?,
            Command::Save => match self.store.save() {
                Ok(()) => writeln!(self.output, "Saved {} item(s).", self.store.len())?,
                Err(err) => {
                    warn!(error = %err, "manual save failed");
                    writeln!(self.output, "Could not save; changes are kept in memory.")?;
                }
            },
            Command::Help => writeln!(self.output, "{HELP}")?,
            Command::Quit => {}
        }
        Ok(())
    }

    fn print_list(&mut self) -> Result<()> {
        if self.store.is_empty() {
            writeln!(self.output, "Nothing to do.")?;
            return Ok(());
        }
        for (row, item) in self.store.items().iter().enumerate() {
            writeln!(
                self.output,
                "{:>3}. {}  {}  [{}]",
                row + 1,
                item.name,
                item.display_time(),
                item.priority
            )?;
        }
        Ok(())
    }

    fn confirm_delete(&mut self, index: usize) -> Result<()> {
        let Some(target) = self.store.get(index).map(|item| (item.id, item.name.clone())) else {
            writeln!(self.output, "error: no row {}", index + 1)?;
            return Ok(());
        };
        let (id, name) = target;
        writeln!(self.output, "Delete \"{name}\"?")?;
        write!(self.output, "{DELETE_PROMPT}")?;
        self.output.flush()?;
        let answer = self.read_line()?.unwrap_or_default();
        if !matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
            writeln!(self.output, "Kept \"{name}\".")?;
            return Ok(());
        }
        let Some(index) = self.store.index_of(&id) else {
            return Ok(());
        };
        match self.store.delete(index) {
            Ok(item) => writeln!(self.output, "Deleted \"{}\".", item.name)?,
            Err(err) => writeln!(self.output, "error: {err}")?,
        }
        Ok(())
    }

    fn deliver_due_reminders(&mut self) -> Result<()> {
        for request in self.scheduler.take_due(&Local::now()) {
            info!(id = %request.id, "reminder fired");
            writeln!(self.output, "{}: {}", request.title, request.body)?;
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("failed to read from terminal")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    fn teardown(&mut self) {
        match self.store.save() {
            Ok(()) => info!(count = self.store.len(), "todo list saved on exit"),
            Err(err) => warn!(error = %err, "failed to save todo list on exit"),
        }
    }
}

pub fn run(config: AppConfig) -> Result<()> {
    info!(
        data_dir = %config.data_dir.display(),
        policy = ?config.persist_policy,
        "starting todo session"
    );
    let scheduler = LocalScheduler::new();
    scheduler.set_authorized(true);

    let mut store = TodoStore::builder()
        .with_settings_store(Box::new(FileSettingsStore::new(&config.data_dir)))
        .with_notification_sink(Box::new(scheduler.clone()))
        .settings_key(config.settings_key.clone())
        .persist_policy(config.persist_policy)
        .build();
    if let Err(err) = store.load() {
        warn!(error = %err, "starting with an empty list");
    }
    store.reschedule_all(Utc::now());

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut session = Session::new(store, scheduler, stdin.lock(), stdout.lock());
    session.run()
}
