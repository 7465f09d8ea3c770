//! Reachability signal with edge-triggered events.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::remote::RemoteService;

/// Transition of the reachability signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
  BecameReachable,
  BecameUnreachable,
}

/// Current reachability plus a feed of transitions.
pub trait ConnectivityMonitor: Send + Sync {
  fn is_reachable(&self) -> bool;

  /// Receive future transitions only. Levels are read with `is_reachable`.
  fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent>;
}

/// Process-wide reachability signal.
///
/// Whoever observes the network (the probe task, a platform hook, a test)
/// calls [`Connectivity::set_reachable`]; events fire only on edges.
pub struct Connectivity {
  state: watch::Sender<bool>,
  events: broadcast::Sender<ConnectivityEvent>,
}

impl Connectivity {
  pub fn new(initially_reachable: bool) -> Self {
    let (state, _) = watch::channel(initially_reachable);
    let (events, _) = broadcast::channel(16);
    Self { state, events }
  }

  /// Update the signal. Returns the event emitted, if the level changed.
  pub fn set_reachable(&self, reachable: bool) -> Option<ConnectivityEvent> {
    let changed = self.state.send_if_modified(|current| {
      if *current == reachable {
        false
      } else {
        *current = reachable;
        true
      }
    });
    if !changed {
      return None;
    }

    let event = if reachable {
      ConnectivityEvent::BecameReachable
    } else {
      ConnectivityEvent::BecameUnreachable
    };
    info!(?event, "Connectivity changed");
    // No subscribers is fine.
    let _ = self.events.send(event);
    Some(event)
  }

  /// Level-triggered view of the signal.
  pub fn watch(&self) -> watch::Receiver<bool> {
    self.state.subscribe()
  }
}

impl ConnectivityMonitor for Connectivity {
  fn is_reachable(&self) -> bool {
    *self.state.borrow()
  }

  fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
    self.events.subscribe()
  }
}

/// Ping the remote once and update the signal.
pub async fn probe_once(connectivity: &Connectivity, remote: &dyn RemoteService) -> bool {
  let reachable = match remote.ping().await {
    Ok(()) => true,
    Err(e) => {
      debug!(error = %e, "Probe failed");
      false
    }
  };
  connectivity.set_reachable(reachable);
  reachable
}

/// Probe the remote every `interval` for as long as the handle lives.
pub fn spawn_probe(
  connectivity: Arc<Connectivity>,
  remote: Arc<dyn RemoteService>,
  interval: Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      probe_once(&connectivity, remote.as_ref()).await;
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::scripted::ScriptedRemote;

  #[test]
  fn test_events_only_on_edges() {
    let connectivity = Connectivity::new(false);
    let mut rx = connectivity.subscribe();

    assert_eq!(connectivity.set_reachable(false), None);
    assert_eq!(
      connectivity.set_reachable(true),
      Some(ConnectivityEvent::BecameReachable)
    );
    assert_eq!(connectivity.set_reachable(true), None);
    assert_eq!(
      connectivity.set_reachable(false),
      Some(ConnectivityEvent::BecameUnreachable)
    );

    assert_eq!(rx.try_recv().unwrap(), ConnectivityEvent::BecameReachable);
    assert_eq!(rx.try_recv().unwrap(), ConnectivityEvent::BecameUnreachable);
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn test_level_is_immediate() {
    let connectivity = Connectivity::new(true);
    assert!(connectivity.is_reachable());
    connectivity.set_reachable(false);
    assert!(!connectivity.is_reachable());
    assert!(!*connectivity.watch().borrow());
  }

  #[tokio::test]
  async fn test_probe_once_sets_signal() {
    let connectivity = Connectivity::new(true);
    let remote = ScriptedRemote::new();

    remote.set_unreachable(true);
    assert!(!probe_once(&connectivity, &remote).await);
    assert!(!connectivity.is_reachable());

    remote.set_unreachable(false);
    assert!(probe_once(&connectivity, &remote).await);
    assert!(connectivity.is_reachable());
  }
}
