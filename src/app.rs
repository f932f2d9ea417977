use crate::backend::api_types::decode_record;
use crate::backend::client::PocketBaseClient;
use crate::backend::store::{IdentityProvider, RecordStore};
use crate::backend::types::{Session, Task, TaskDraft, TaskPatch, User};
use crate::cache::{EntryStatus, Mutation, MutationOutcome};
use crate::commands::{self, ShellCommand};
use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::event::{Event, EventHandler, Settlement};
use crate::partner::PartnerTasks;
use crate::render;
use crate::session::SessionStore;
use crate::tasks::Tasks;
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Main application state
pub struct App {
  config: Config,

  /// Backend binding, shared by both accessors
  client: Arc<PocketBaseClient>,

  /// Where the sign-in survives between runs
  sessions: SessionStore,

  /// Current sign-in, if any
  session: Option<Session>,

  /// The user's own tasks
  tasks: Tasks,

  /// The partner's tasks, read-only
  partner: PartnerTasks,
}

/// What the shell last printed, so ticks only print changes
#[derive(Default)]
struct ShellState {
  last_own: String,
  last_partner: Option<String>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let client = Arc::new(PocketBaseClient::new(&config)?);
    let store: Arc<dyn RecordStore> = client.clone();
    let settings = config.cache_settings();
    let sessions = SessionStore::open(&config.backend.url)?;
    let session = sessions.load();

    Ok(Self {
      tasks: Tasks::new(Arc::clone(&store), settings),
      partner: PartnerTasks::new(store, &config.backend.users_collection, settings),
      config,
      client,
      sessions,
      session,
    })
  }

  fn require_session(&self) -> Result<Session> {
    self
      .session
      .clone()
      .ok_or_else(|| eyre!("Not signed in. Run `duet login` first."))
  }

  fn sign_in(&mut self, session: Session) -> Result<()> {
    if let Some(previous) = self.session.take() {
      self.forget(&previous);
    }
    self.sessions.save(&session)?;
    info!(user = %session.user.id, "signed in");
    println!("Signed in as {}", session.user.email);
    self.session = Some(session);
    Ok(())
  }

  /// Drop every cached scope belonging to `session`.
  fn forget(&self, session: &Session) {
    self.tasks.teardown(session);
    self.partner.teardown(session);
  }

  pub async fn login(&mut self, email: Option<String>) -> Result<()> {
    let email = match email {
      Some(email) => email,
      None => prompt("Email: ")?,
    };
    let password = match Config::get_password() {
      Some(password) => password,
      None => prompt("Password: ")?,
    };

    let session = self.client.login(&email, &password).await?;
    self.sign_in(session)
  }

  pub async fn register(&mut self, email: Option<String>) -> Result<()> {
    let email = match email {
      Some(email) => email,
      None => prompt("Email: ")?,
    };
    let (password, confirmation) = match Config::get_password() {
      Some(password) => (password.clone(), password),
      None => (prompt("Password: ")?, prompt("Confirm password: ")?),
    };

    let session = self.client.register(&email, &password, &confirmation).await?;
    self.sign_in(session)
  }

  pub fn logout(&mut self) -> Result<()> {
    if let Some(session) = self.session.take() {
      self.forget(&session);
      info!(user = %session.user.id, "signed out");
    }
    self.sessions.clear()?;
    println!("Signed out");
    Ok(())
  }

  /// Check the stored token against the backend and show the account.
  pub async fn whoami(&mut self) -> Result<()> {
    let session = self.require_session()?;
    let users = self.config.backend.users_collection.as_str();

    match self.client.get_one(&session, users, session.user_id()).await {
      Ok(record) => {
        let user: User = decode_record(users, record)?;
        let name = user.name.as_deref().filter(|n| !n.is_empty());
        match name {
          Some(name) => println!("{} <{}> ({})", name, user.email, user.id),
          None => println!("{} ({})", user.email, user.id),
        }
        Ok(())
      }
      Err(SyncError::NotAuthenticated) => {
        self.session = None;
        self.sessions.clear()?;
        Err(eyre!("Session expired. Run `duet login` again."))
      }
      Err(err) => Err(err.into()),
    }
  }

  pub async fn list(&self) -> Result<()> {
    let session = self.require_session()?;
    let result = self.tasks.fetch(Some(&session)).await;
    print!("{}", render::own_tasks(&result));
    match (result.status, result.error) {
      (EntryStatus::Error, Some(err)) => Err(err.into()),
      _ => Ok(()),
    }
  }

  pub async fn show_partner(&self) -> Result<()> {
    let session = self.require_session()?;
    let view = self.partner.fetch(Some(&session)).await;
    print!("{}", render::partner_tasks(&view));
    match view.error() {
      Some(err) => Err(err.clone().into()),
      None => Ok(()),
    }
  }

  pub async fn add(&self, text: &str) -> Result<()> {
    let session = self.require_session()?;
    if let MutationOutcome::Created(task) = self.tasks.add(&session, text).await? {
      debug!(id = %task.id, "task created");
    }
    self.list().await
  }

  pub async fn edit(&self, position: usize, text: &str) -> Result<()> {
    let session = self.require_session()?;
    let task = self.task_at(&session, position).await?;
    if let MutationOutcome::Updated(updated) = self.tasks.edit(&session, &task.id, text).await? {
      debug!(id = %updated.id, "task updated");
    }
    self.list().await
  }

  pub async fn toggle(&self, position: usize) -> Result<()> {
    let session = self.require_session()?;
    let task = self.task_at(&session, position).await?;
    self.tasks.toggle(&session, &task.id).await?;
    self.list().await
  }

  pub async fn remove(&self, position: usize) -> Result<()> {
    let session = self.require_session()?;
    let task = self.task_at(&session, position).await?;
    self.tasks.remove(&session, &task.id).await?;
    self.list().await
  }

  async fn task_at(&self, session: &Session, position: usize) -> Result<Task> {
    let result = self.tasks.fetch(Some(session)).await;
    render::nth_task(&result, position)
      .cloned()
      .ok_or_else(|| eyre!("No task #{} (you have {})", position, result.data.len()))
  }

  /// Interactive loop over typed commands and the poll tick.
  pub async fn shell(&mut self) -> Result<()> {
    let session = self.require_session()?;
    let mut events = EventHandler::new(self.config.poll_interval());
    let tx = events.sender();
    let mut state = ShellState::default();

    println!("Signed in as {}. Type 'help' for commands.", session.user.email);
    let result = self.tasks.fetch(Some(&session)).await;
    self.show_own(&mut state, render::own_tasks(&result), true);
    prompt_marker();

    while let Some(event) = events.next().await {
      match event {
        Event::Line(line) => match commands::parse(&line) {
          Ok(None) => {}
          Ok(Some(ShellCommand::Quit)) => break,
          Ok(Some(command)) => self.run_command(&session, command, &tx, &mut state).await,
          Err(message) => println!("{}", message),
        },
        Event::Eof => break,
        Event::Tick => {
          self.poll(&session, &mut state).await;
          continue;
        }
        Event::Settled(settlement) => {
          if let Some(error) = &settlement.error {
            println!("{} failed: {}", settlement.kind, error);
          }
          let current = self.tasks.read(Some(&session));
          self.show_own(&mut state, render::own_tasks(&current), settlement.error.is_some());
        }
      }
      prompt_marker();
    }

    self.forget(&session);
    Ok(())
  }

  async fn run_command(
    &self,
    session: &Session,
    command: ShellCommand,
    tx: &mpsc::UnboundedSender<Event>,
    state: &mut ShellState,
  ) {
    let scope = session.user_id().to_string();
    let write = match command {
      ShellCommand::List => {
        let result = self.tasks.fetch(Some(session)).await;
        self.show_own(state, render::own_tasks(&result), true);
        return;
      }
      ShellCommand::Partner => {
        let view = self.partner.fetch(Some(session)).await;
        let text = render::partner_tasks(&view);
        print!("{}", text);
        state.last_partner = Some(text);
        return;
      }
      ShellCommand::Refresh => {
        let result = self.tasks.refetch(Some(session)).await;
        self.show_own(state, render::own_tasks(&result), true);
        if state.last_partner.is_some() {
          let view = self.partner.refetch(Some(session)).await;
          let text = render::partner_tasks(&view);
          print!("{}", text);
          state.last_partner = Some(text);
        }
        return;
      }
      ShellCommand::WhoAmI => {
        println!("{} ({})", session.user.email, session.user_id());
        return;
      }
      ShellCommand::Help => {
        println!("{}", commands::help());
        return;
      }
      ShellCommand::Quit => return,
      ShellCommand::Add(text) => {
        let handle = self
          .tasks
          .creates()
          .invoke(session.clone(), scope, Mutation::Create(TaskDraft::new(&text)));
        ("add", handle)
      }
      ShellCommand::Edit(position, text) => match self.shell_task(session, position) {
        Ok(task) => {
          let mutation = Mutation::Update {
            id: task.id,
            patch: TaskPatch::describe(&text),
          };
          ("edit", self.tasks.updates().invoke(session.clone(), scope, mutation))
        }
        Err(message) => {
          println!("{}", message);
          return;
        }
      },
      ShellCommand::Toggle(position) => {
        let mutation = self
          .shell_task(session, position)
          .and_then(|task| {
            self
              .tasks
              .toggle_mutation(session, &task.id)
              .map_err(|e| e.to_string())
          });
        match mutation {
          Ok(mutation) => ("toggle", self.tasks.updates().invoke(session.clone(), scope, mutation)),
          Err(message) => {
            println!("{}", message);
            return;
          }
        }
      }
      ShellCommand::Remove(position) => match self.shell_task(session, position) {
        Ok(task) => {
          let mutation = Mutation::Delete { id: task.id };
          ("rm", self.tasks.deletes().invoke(session.clone(), scope, mutation))
        }
        Err(message) => {
          println!("{}", message);
          return;
        }
      },
    };

    let (kind, handle) = write;
    // The local change is already applied; show it before the server answers
    let current = self.tasks.read(Some(session));
    self.show_own(state, render::own_tasks(&current), true);
    report_settlement(kind, handle, tx.clone());
  }

  /// Resolve a position against what the user is looking at, not a fresh fetch.
  fn shell_task(&self, session: &Session, position: usize) -> Result<Task, String> {
    let current = self.tasks.read(Some(session));
    render::nth_task(&current, position)
      .cloned()
      .ok_or_else(|| format!("no task #{} (you have {})", position, current.data.len()))
  }

  /// Refetch whatever has gone stale and print lists that changed.
  async fn poll(&self, session: &Session, state: &mut ShellState) {
    if self.tasks.is_mutating() {
      debug!("skipping poll while writes are in flight");
      return;
    }
    let result = self.tasks.fetch(Some(session)).await;
    if self.show_own(state, render::own_tasks(&result), false) {
      prompt_marker();
    }

    if state.last_partner.is_some() {
      let view = self.partner.fetch(Some(session)).await;
      let text = render::partner_tasks(&view);
      if state.last_partner.as_deref() != Some(text.as_str()) {
        print!("{}", text);
        state.last_partner = Some(text);
        prompt_marker();
      }
    }
  }

  /// Print the own list if forced or changed. Returns whether it printed.
  fn show_own(&self, state: &mut ShellState, text: String, force: bool) -> bool {
    if !force && text == state.last_own {
      return false;
    }
    print!("{}", text);
    state.last_own = text;
    true
  }
}

/// Forward a fire-and-forget write's outcome into the event loop.
fn report_settlement(
  kind: &'static str,
  handle: JoinHandle<SyncResult<MutationOutcome<Task>>>,
  tx: mpsc::UnboundedSender<Event>,
) {
  tokio::spawn(async move {
    let error = match handle.await {
      Ok(Ok(_)) => None,
      Ok(Err(err)) => Some(err.to_string()),
      Err(err) => Some(err.to_string()),
    };
    let _ = tx.send(Event::Settled(Settlement { kind, error }));
  });
}

fn prompt_marker() {
  print!("duet> ");
  let _ = std::io::stdout().flush();
}

fn prompt(label: &str) -> Result<String> {
  print!("{}", label);
  std::io::stdout().flush()?;
  let mut line = String::new();
  std::io::stdin().read_line(&mut line)?;
  let value = line.trim_end_matches(['\r', '\n']).to_string();
  if value.is_empty() {
    return Err(eyre!("{} is required", label.trim_end_matches([':', ' '])));
  }
  Ok(value)
}
