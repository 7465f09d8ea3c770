use crate::ui::{self, SyncStatus};
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use fieldsync::cache::ResourceKey;
use fieldsync::config::Config;
use fieldsync::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use fieldsync::event::{Event, EventHandler, SyncNotification};
use fieldsync::{FieldClient, OptimisticView, ReadOutcome};
use ratatui::prelude::*;
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::error;

/// What the body area currently shows
#[derive(Debug)]
pub enum Body {
  Loading,
  Ready(Box<OptimisticView>),
  /// Offline and nothing cached for the key
  Unavailable,
  Failed(String),
}

/// Main application state
pub struct App {
  client: Arc<FieldClient>,

  config: Config,

  /// Resource shown in the body
  key: ResourceKey,

  body: Body,

  /// Vertical scroll offset of the tree
  scroll: u16,

  /// Last abandoned write, cleared by the next clean drain
  rejection: Option<String>,

  /// Latest one-shot notice
  notice: Option<String>,

  /// Event sender for async tasks
  event_tx: mpsc::UnboundedSender<Event>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub fn new(client: Arc<FieldClient>, config: Config, key: ResourceKey) -> Self {
    let (tx, _rx) = mpsc::unbounded_channel();

    Self {
      client,
      config,
      key,
      body: Body::Loading,
      scroll: 0,
      rejection: None,
      notice: None,
      event_tx: tx,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = events.sender();
    events.forward_sync(self.client.notifications());
    events.forward_connectivity(self.client.connectivity().subscribe());

    self.reload();

    // Main loop
    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      if let Some(event) = events.next().await {
        self.handle_event(event);
      }
    }

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
  }

  /// Read the current key in the background
  fn reload(&self) {
    let client = self.client.clone();
    let key = self.key.clone();
    let tx = self.event_tx.clone();

    tokio::spawn(async move {
      let result = client.read(&key).await.map_err(|e| e.to_string());
      let _ = tx.send(Event::Read(result));
    });
  }

  fn start_drain(&self) {
    let client = self.client.clone();
    tokio::spawn(async move {
      // Progress and results arrive as notifications.
      if let Err(e) = client.drain().await {
        error!(error = %e, "Manual drain failed");
      }
    });
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => {} // UI refresh happens automatically
      Event::Sync(notification) => self.handle_notification(notification),
      Event::Connectivity(edge) => {
        self.notice = Some(match edge {
          ConnectivityEvent::BecameReachable => "Back online".to_string(),
          ConnectivityEvent::BecameUnreachable => "Connection lost, changes are saved locally".to_string(),
        });
      }
      Event::Read(Ok(ReadOutcome::Available(view))) => self.body = Body::Ready(Box::new(view)),
      Event::Read(Ok(ReadOutcome::Unavailable { .. })) => self.body = Body::Unavailable,
      Event::Read(Err(message)) => self.body = Body::Failed(message),
    }
  }

  fn handle_notification(&mut self, notification: SyncNotification) {
    let message = notification.message();
    if notification.changes_overlay() {
      self.reload();
    }
    match notification {
      SyncNotification::TaskRejected { .. } => self.rejection = Some(message),
      SyncNotification::DrainFinished(report) => {
        if report.is_complete() && report.rejected == 0 {
          self.rejection = None;
        }
        self.notice = Some(message);
      }
      SyncNotification::WriteQueued { .. }
      | SyncNotification::CacheRefreshed
      | SyncNotification::DrainStarted { .. } => self.notice = Some(message),
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Char('q') => self.should_quit = true,
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }
      KeyCode::Char('r') => {
        self.body = Body::Loading;
        self.reload();
      }
      KeyCode::Char('s') => self.start_drain(),
      KeyCode::Up | KeyCode::Char('k') => self.scroll = self.scroll.saturating_sub(1),
      KeyCode::Down | KeyCode::Char('j') => self.scroll = self.scroll.saturating_add(1),
      KeyCode::Home | KeyCode::Char('g') => self.scroll = 0,
      _ => {}
    }
  }

  // Accessors for UI rendering
  pub fn body(&self) -> &Body {
    &self.body
  }

  pub fn key(&self) -> &ResourceKey {
    &self.key
  }

  pub fn scroll(&self) -> u16 {
    self.scroll
  }

  pub fn title(&self) -> &str {
    self.config.title.as_deref().unwrap_or("field visits")
  }

  pub fn remote_url(&self) -> &str {
    &self.config.remote.url
  }

  pub fn is_reachable(&self) -> bool {
    self.client.is_reachable()
  }

  pub fn sync_status(&self) -> SyncStatus {
    SyncStatus {
      pending: self.client.queue_length().unwrap_or_default(),
      syncing: self.client.is_syncing(),
      reachable: self.client.is_reachable(),
      rejection: self.rejection.clone(),
      notice: self.notice.clone(),
    }
  }
}
