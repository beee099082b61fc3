//! Single-writer event loop that owns the session, sockets and timers.

use crate::transport::{self, Outbound};
use pulsewire_core::{Command, Event, Session, Snapshot, TimerId, TransportId, now_millis};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Requests from client handles.
#[derive(Debug)]
pub(crate) enum Control {
    Event(Event),
    Shutdown,
}

pub(crate) struct Driver {
    session: Session,
    events: mpsc::UnboundedSender<Event>,
    snapshots: watch::Sender<Snapshot>,
    transports: HashMap<TransportId, mpsc::UnboundedSender<Outbound>>,
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl Driver {
    /// Run until shutdown is requested or every handle is dropped.
    pub(crate) async fn run(
        session: Session,
        snapshots: watch::Sender<Snapshot>,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) {
        let (events, mut inbound) = mpsc::unbounded_channel();
        let mut driver = Driver {
            session,
            events,
            snapshots,
            transports: HashMap::new(),
            timers: HashMap::new(),
        };

        loop {
            let event = tokio::select! {
                biased;
                request = control.recv() => match request {
                    Some(Control::Event(event)) => event,
                    Some(Control::Shutdown) | None => break,
                },
                Some(event) = inbound.recv() => event,
            };
            driver.step(event);
        }

        driver.step(Event::Disconnect);
        driver.teardown();
    }

    fn step(&mut self, event: Event) {
        match &event {
            Event::Closed { transport, .. } => {
                self.transports.remove(transport);
            }
            Event::ReconnectDue { timer } => {
                self.timers.remove(timer);
            }
            _ => {}
        }

        for command in self.session.handle(event) {
            self.execute(command);
        }
        self.publish();
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::OpenTransport { transport, url } => {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(transport::run(transport, url, self.events.clone(), rx));
                self.transports.insert(transport, tx);
            }
            Command::CloseTransport { transport, code } => {
                if let Some(tx) = self.transports.get(&transport) {
                    let _ = tx.send(Outbound::Close(code));
                }
            }
            Command::SendFrame { transport, text } => {
                let delivered = self
                    .transports
                    .get(&transport)
                    .is_some_and(|tx| tx.send(Outbound::Text(text)).is_ok());
                if !delivered {
                    tracing::debug!(%transport, "transport gone, frame dropped");
                }
            }
            Command::ScheduleReconnect { timer, delay, .. } => {
                let events = self.events.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = events.send(Event::ReconnectDue { timer });
                });
                self.timers.insert(timer, handle);
            }
            Command::ArmHeartbeat { timer, interval } => {
                let handle = tokio::spawn(heartbeat(timer, interval, self.events.clone()));
                self.timers.insert(timer, handle);
            }
            Command::CancelReconnect { timer } | Command::DisarmHeartbeat { timer } => {
                if let Some(handle) = self.timers.remove(&timer) {
                    handle.abort();
                }
            }
        }
    }

    fn publish(&self) {
        let next = self.session.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn teardown(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        // Dropping the senders ends any transport still running.
        self.transports.clear();
        tracing::debug!("client driver stopped");
    }
}

async fn heartbeat(timer: TimerId, interval: Duration, events: mpsc::UnboundedSender<Event>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    // A stalled runtime sends one ping on recovery, not a burst.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let due = Event::HeartbeatDue {
            timer,
            now: now_millis(),
        };
        if events.send(due).is_err() {
            break;
        }
    }
}
