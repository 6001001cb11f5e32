//! Fire-and-forget event fan-out for observers (UI, logs). Losing an event
//! is acceptable; blocking the pipeline is not.

use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct RequestFinishedEvent {
    pub request_id: String,
    pub status: &'static str,
    pub provider_id: i64,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub enum Event {
    RequestFinished(RequestFinishedEvent),
}

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Event>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(64)
    }
}
