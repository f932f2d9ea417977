use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Shell events
#[derive(Debug)]
pub enum Event {
  /// A line typed at the prompt
  Line(String),
  /// Input closed (ctrl-d or end of piped input)
  Eof,
  /// Periodic tick for stale-scope polling
  Tick,
  /// A fire-and-forget write finished
  Settled(Settlement),
}

/// How a write ended, as reported back to the loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
  pub kind: &'static str,
  pub error: Option<String>,
}

/// Event handler that produces events from stdin lines and a tick timer
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let input_tx = tx.clone();
    tokio::spawn(async move {
      let mut lines = BufReader::new(tokio::io::stdin()).lines();
      loop {
        let event = match lines.next_line().await {
          Ok(Some(line)) => Event::Line(line),
          Ok(None) | Err(_) => Event::Eof,
        };
        let done = matches!(event, Event::Eof);
        if input_tx.send(event).is_err() || done {
          break;
        }
      }
    });

    let tick_tx = tx.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      // The first tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        if tick_tx.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self { tx, rx }
  }

  /// Sender for background work reporting back into the loop
  pub fn sender(&self) -> mpsc::UnboundedSender<Event> {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
