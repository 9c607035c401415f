use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{Transport, TransportError, TransportEvent};
use crate::protocol::CloseCode;

/// Scripted in-memory transport. Clones share state so a test can keep a
/// handle after moving the transport into its owner.
#[derive(Clone, Default)]
pub struct StubTransport {
    state: Rc<RefCell<StubState>>,
}

#[derive(Default)]
pub struct StubState {
    pub connects: Vec<String>,
    pub closes: usize,
    pub sent_text: Vec<String>,
    pub sent_binary: Vec<Vec<u8>>,
    pub open: bool,
    pub queued: VecDeque<TransportEvent>,
    /// Queue `Opened` as soon as `connect` is called
    pub open_on_connect: bool,
    /// Make `connect` fail synchronously with this reason
    pub refuse_connect: Option<String>,
    pub fail_sends: bool,
    /// Report `Busy` once this many binary messages have been accepted
    pub uplink_capacity: Option<usize>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opening() -> Self {
        let stub = Self::new();
        stub.state.borrow_mut().open_on_connect = true;
        stub
    }

    pub fn push(&self, event: TransportEvent) {
        self.state.borrow_mut().queued.push_back(event);
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut StubState) -> R) -> R {
        f(&mut self.state.borrow_mut())
    }

    pub fn connect_count(&self) -> usize {
        self.state.borrow().connects.len()
    }

    pub fn sent_text(&self) -> Vec<String> {
        self.state.borrow().sent_text.clone()
    }

    pub fn sent_binary_count(&self) -> usize {
        self.state.borrow().sent_binary.len()
    }
}

impl Transport for StubTransport {
    fn connect(&mut self, uri: &str) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        state.connects.push(uri.to_string());
        if let Some(reason) = state.refuse_connect.clone() {
            return Err(TransportError::InvalidEndpoint(reason));
        }
        if state.open_on_connect {
            state.queued.push_back(TransportEvent::Opened);
        }
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.borrow_mut();
        state.closes += 1;
        state.open = false;
        state.queued.clear();
    }

    fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if !state.open || state.fail_sends {
            return Err(TransportError::NotConnected);
        }
        state.sent_text.push(text.to_string());
        Ok(())
    }

    fn send_binary(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if !state.open || state.fail_sends {
            return Err(TransportError::NotConnected);
        }
        if state.uplink_capacity.is_some_and(|cap| state.sent_binary.len() >= cap) {
            return Err(TransportError::Busy);
        }
        state.sent_binary.push(data.to_vec());
        Ok(())
    }

    fn service_events(&mut self) -> Vec<TransportEvent> {
        let mut state = self.state.borrow_mut();
        let events: Vec<TransportEvent> = state.queued.drain(..).collect();
        for event in &events {
            match event {
                TransportEvent::Opened => state.open = true,
                TransportEvent::Closed(_) | TransportEvent::Error(_) => state.open = false,
                _ => {}
            }
        }
        events
    }
}

/// Shorthand for an abnormal close event
pub fn dropped() -> TransportEvent {
    TransportEvent::Closed(CloseCode::Abnormal(1006))
}
