//! Notifications from the sync machinery and the TUI event feed.

use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::client::ReadOutcome;
use crate::connectivity::ConnectivityEvent;
use crate::queue::TaskId;
use crate::sync::DrainReport;

/// One-shot notices for the user, published by the sync engine and client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotification {
  /// A write was stored locally instead of being sent.
  WriteQueued { task_id: TaskId, description: String },
  DrainStarted { pending: usize },
  DrainFinished(DrainReport),
  /// A queued write was refused by the server and dropped from the queue.
  TaskRejected {
    task_id: TaskId,
    description: String,
    status: u16,
    reason: String,
  },
  /// Cached data was invalidated after a full drain or reconnect.
  CacheRefreshed,
}

impl SyncNotification {
  /// Short text for a status line.
  pub fn message(&self) -> String {
    match self {
      Self::WriteQueued { description, .. } => format!("Saved locally: {}", description),
      Self::DrainStarted { pending } => format!("Syncing {} pending item(s)...", pending),
      Self::DrainFinished(report) => report.summary(),
      Self::TaskRejected {
        task_id,
        description,
        reason,
        ..
      } => format!("Abandoned {} ({}...): {}", description, task_id.short(), reason),
      Self::CacheRefreshed => "Data refreshed".to_string(),
    }
  }

  /// Whether views showing the overlay should be re-read. A drain that
  /// settled tasks but stopped early publishes no `CacheRefreshed`.
  pub fn changes_overlay(&self) -> bool {
    match self {
      Self::WriteQueued { .. } | Self::CacheRefreshed => true,
      Self::DrainFinished(report) => report.delivered + report.rejected > 0,
      Self::DrainStarted { .. } | Self::TaskRejected { .. } => false,
    }
  }
}

/// Application events
#[derive(Debug)]
pub enum Event {
  /// Terminal key press
  Key(KeyEvent),
  /// Periodic tick for UI refresh
  Tick,
  Sync(SyncNotification),
  Connectivity(ConnectivityEvent),
  /// A background read finished
  Read(Result<ReadOutcome, String>),
}

/// Event handler that merges terminal input, a tick timer and the sync
/// notification feeds into one channel.
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let input_tx = tx.clone();
    tokio::task::spawn_blocking(move || loop {
      if event::poll(tick_rate).unwrap_or(false) {
        if let Ok(CrosstermEvent::Key(key)) = event::read() {
          if key.kind == KeyEventKind::Press && input_tx.send(Event::Key(key)).is_err() {
            break;
          }
        }
      } else if input_tx.send(Event::Tick).is_err() {
        break;
      }
    });

    Self { tx, rx }
  }

  /// Sender for background tasks that report back to the UI
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Forward sync notifications into the event stream.
  pub fn forward_sync(&self, mut notifications: broadcast::Receiver<SyncNotification>) {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      loop {
        match notifications.recv().await {
          Ok(n) => {
            if tx.send(Event::Sync(n)).is_err() {
              break;
            }
          }
          Err(broadcast::error::RecvError::Lagged(_)) => continue,
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    });
  }

  /// Forward connectivity edges into the event stream.
  pub fn forward_connectivity(&self, mut edges: broadcast::Receiver<ConnectivityEvent>) {
    let tx = self.tx.clone();
    tokio::spawn(async move {
      loop {
        match edges.recv().await {
          Ok(e) => {
            if tx.send(Event::Connectivity(e)).is_err() {
              break;
            }
          }
          Err(broadcast::error::RecvError::Lagged(_)) => continue,
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    });
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
