//! # Session Context
//!
//! Shared view of one bridge session handed to every loop and to the device
//! bridge hooks. It owns the device state, the published availability and
//! the change-detection snapshots, and queues publishes through the outbox.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use serde::Serialize;

use super::outbox::{OwnedPublishRequest, Outbox};
use super::topics::TopicSet;
use super::traits::Availability;
use crate::config::BridgeConfig;
use crate::error::EncodeError;
use crate::mqtt::QoS;

struct Published<S> {
    status: Availability,
    state: S,
    last_state: Option<S>,
}

pub struct SessionContext<'a, S> {
    config: &'a BridgeConfig<'a>,
    topics: &'a TopicSet,
    outbox: &'a Outbox,
    shared: Mutex<NoopRawMutex, RefCell<Published<S>>>,
}

impl<'a, S> SessionContext<'a, S>
where
    S: Clone + PartialEq + Serialize,
{
    /// Starts offline with `state` not yet published.
    pub fn new(
        config: &'a BridgeConfig<'a>,
        topics: &'a TopicSet,
        outbox: &'a Outbox,
        state: S,
    ) -> Self {
        Self {
            config,
            topics,
            outbox,
            shared: Mutex::new(RefCell::new(Published {
                status: Availability::Offline,
                state,
                last_state: None,
            })),
        }
    }

    pub fn config(&self) -> &BridgeConfig<'a> {
        self.config
    }

    pub fn topics(&self) -> &TopicSet {
        self.topics
    }

    /// Last availability set through [`publish_status`](Self::publish_status).
    pub fn status(&self) -> Availability {
        self.shared.lock(|cell| cell.borrow().status)
    }

    /// Snapshot of the current device state.
    pub fn state(&self) -> S {
        self.shared.lock(|cell| cell.borrow().state.clone())
    }

    /// Mutates the device state in place. Nothing is published.
    pub fn update_state<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        self.shared.lock(|cell| f(&mut cell.borrow_mut().state))
    }

    /// Queues a publish. Completes once the request is in the outbox.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), EncodeError> {
        let request = OwnedPublishRequest::new(topic, payload, qos, retain)?;
        self.outbox.send(request).await;
        Ok(())
    }

    /// Queues `value` serialized as JSON.
    pub async fn publish_json<V: Serialize>(
        &self,
        topic: &str,
        value: &V,
        qos: QoS,
        retain: bool,
    ) -> Result<(), EncodeError> {
        let request = OwnedPublishRequest::json(topic, value, qos, retain)?;
        self.outbox.send(request).await;
        Ok(())
    }

    /// Publishes `status` retained at QoS 2 if it differs from the last one,
    /// or unconditionally with `force`.
    pub async fn publish_status(&self, status: Availability, force: bool) -> Result<(), EncodeError> {
        let changed = self.shared.lock(|cell| {
            let mut shared = cell.borrow_mut();
            let changed = shared.status != status;
            shared.status = status;
            changed
        });
        if !(force || changed) {
            return Ok(());
        }
        info!("Status {}", status);
        self.publish(&self.topics.status, status.as_str().as_bytes(), QoS::ExactlyOnce, true)
            .await
    }

    /// Publishes the state JSON retained if it changed since the last
    /// publish, or unconditionally with `force`.
    pub async fn publish_state(&self, force: bool) -> Result<(), EncodeError> {
        let state = self.shared.lock(|cell| {
            let mut shared = cell.borrow_mut();
            if !force && shared.last_state.as_ref() == Some(&shared.state) {
                return None;
            }
            let state = shared.state.clone();
            shared.last_state = Some(state.clone());
            Some(state)
        });
        let Some(state) = state else {
            return Ok(());
        };
        let request = OwnedPublishRequest::json(&self.topics.state, &state, QoS::AtMostOnce, true)?;
        debug!("State {}", core::str::from_utf8(&request.payload).unwrap_or("<binary>"));
        self.outbox.send(request).await;
        Ok(())
    }
}
