//! Publish/subscribe notifications about outputs, devices and frames.

use super::OutputId;
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderEventKind {
    OutputAdded,
    OutputRemoved,
    DeviceAdded,
    DeviceRemoved,
    FramePresented,
    FrameRolledBack,
    ContextLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    OutputAdded(OutputId),
    OutputRemoved(OutputId),
    DeviceAdded { renderer: String },
    DeviceRemoved { renderer: String },
    FramePresented { output: OutputId, sequence: u64 },
    FrameRolledBack { output: OutputId },
    ContextLost,
}

impl RenderEvent {
    pub fn kind(&self) -> RenderEventKind {
        match self {
            RenderEvent::OutputAdded(_) => RenderEventKind::OutputAdded,
            RenderEvent::OutputRemoved(_) => RenderEventKind::OutputRemoved,
            RenderEvent::DeviceAdded { .. } => RenderEventKind::DeviceAdded,
            RenderEvent::DeviceRemoved { .. } => RenderEventKind::DeviceRemoved,
            RenderEvent::FramePresented { .. } => RenderEventKind::FramePresented,
            RenderEvent::FrameRolledBack { .. } => RenderEventKind::FrameRolledBack,
            RenderEvent::ContextLost => RenderEventKind::ContextLost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Box<dyn FnMut(&RenderEvent)>;

#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    subscribers: HashMap<RenderEventKind, Vec<(SubscriptionId, Handler)>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<_, _> = self.subscribers.iter().map(|(k, v)| (*k, v.len())).collect();
        f.debug_struct("EventBus").field("subscribers", &counts).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, kind: RenderEventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&RenderEvent) + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for handlers in self.subscribers.values_mut() {
            if let Some(index) = handlers.iter().position(|(sid, _)| *sid == id) {
                handlers.remove(index);
                return true;
            }
        }
        false
    }

    /// Delivers `event` to its kind's subscribers in subscription order.
    pub fn publish(&mut self, event: RenderEvent) {
        trace!(target: "frame", "Event {:?}", event);
        if let Some(handlers) = self.subscribers.get_mut(&event.kind()) {
            for (_, handler) in handlers.iter_mut() {
                handler(&event);
            }
        }
    }
}
