//! In-memory bus shared by the integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use embassy_time::{Duration, Instant, Timer};
use myrtio_hatt::QoS;
use myrtio_hatt::mqtt::Will;
use myrtio_hatt::runtime::{BusClient, BusConnector, InboundMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect {
        client_id: String,
        will_topic: String,
        will_payload: Vec<u8>,
        will_qos: QoS,
        will_retain: bool,
    },
    Subscribe(String),
    Publish {
        topic: String,
        payload: String,
        qos: QoS,
        retain: bool,
    },
    Drain,
    Disconnect,
}

impl Event {
    pub fn published(&self) -> Option<(&str, &str)> {
        match self {
            Event::Publish { topic, payload, .. } => Some((topic.as_str(), payload.as_str())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockError {
    Lost,
}

/// Broker side of the mock: records everything the session does and feeds
/// it inbound messages.
#[derive(Default)]
pub struct Bus {
    events: RefCell<Vec<Event>>,
    inbound: RefCell<VecDeque<InboundMessage>>,
    lost: Cell<bool>,
}

impl Bus {
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// `(topic, payload)` of every publish, in order.
    pub fn publishes(&self) -> Vec<(String, String)> {
        self.events
            .borrow()
            .iter()
            .filter_map(Event::published)
            .map(|(t, p)| (t.to_string(), p.to_string()))
            .collect()
    }

    pub fn publishes_to(&self, topic: &str) -> Vec<String> {
        self.publishes()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p)
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    pub fn inject(&self, topic: &str, payload: &[u8]) {
        let message = InboundMessage::new(topic, payload).unwrap();
        self.inbound.borrow_mut().push_back(message);
    }

    /// Fails the next receive. Publishes keep working.
    pub fn drop_connection(&self) {
        self.lost.set(true);
    }

    fn record(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

pub struct MockConnector<'b> {
    pub bus: &'b Bus,
}

pub struct MockClient<'b> {
    bus: &'b Bus,
}

impl BusConnector for MockConnector<'_> {
    type Error = MockError;
    type Client<'c>
        = MockClient<'c>
    where
        Self: 'c;

    async fn connect(
        &mut self,
        client_id: &str,
        will: Will<'_>,
    ) -> Result<Self::Client<'_>, MockError> {
        self.bus.lost.set(false);
        self.bus.record(Event::Connect {
            client_id: client_id.to_string(),
            will_topic: will.topic.to_string(),
            will_payload: will.payload.to_vec(),
            will_qos: will.qos,
            will_retain: will.retain,
        });
        Ok(MockClient { bus: self.bus })
    }
}

impl BusClient for MockClient<'_> {
    type Error = MockError;

    async fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), MockError> {
        self.bus.record(Event::Subscribe(topic.to_string()));
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MockError> {
        self.bus.record(Event::Publish {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            qos,
            retain,
        });
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<InboundMessage>, MockError> {
        loop {
            if self.bus.lost.get() {
                return Err(MockError::Lost);
            }
            if let Some(message) = self.bus.inbound.borrow_mut().pop_front() {
                return Ok(Some(message));
            }
            Timer::after(Duration::from_millis(1)).await;
        }
    }

    async fn flush(&mut self) -> Result<(), MockError> {
        Ok(())
    }

    async fn drain(&mut self) -> Result<(), MockError> {
        self.bus.record(Event::Drain);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MockError> {
        self.bus.record(Event::Disconnect);
        Ok(())
    }
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Polls `condition` until it holds, panicking after `limit`.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {:?}", limit);
        Timer::after(ms(5)).await;
    }
}
