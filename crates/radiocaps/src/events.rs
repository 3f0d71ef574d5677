//! Notifications produced by the arbitration core, and the observer list
//! that delivers them.

use crate::raf::Raf;

/// Events emitted to network-mode logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapsEvent {
    /// A slot's granted RAF changed. Fired after every slot touched by a
    /// transaction has been committed.
    RafChanged { slot: usize, raf: Raf },
    /// A capability switch completed.
    TxDone { tx_id: u32 },
    /// A capability switch was rolled back.
    TxAborted { tx_id: u32 },
    /// The slot's modem cannot switch capabilities; it stays out of the
    /// registry.
    CapsUnsupported { slot: usize },
}

impl CapsEvent {
    /// Slot this event is about, if it is slot-scoped.
    pub fn slot(&self) -> Option<usize> {
        match self {
            CapsEvent::RafChanged { slot, .. } | CapsEvent::CapsUnsupported { slot } => {
                Some(*slot)
            }
            CapsEvent::TxDone { .. } | CapsEvent::TxAborted { .. } => None,
        }
    }
}

/// Subscription token returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Which events a handler wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Filter {
    All,
    RafChanged(usize),
}

impl Filter {
    fn accepts(self, event: &CapsEvent) -> bool {
        match self {
            Filter::All => true,
            Filter::RafChanged(slot) => {
                matches!(event, CapsEvent::RafChanged { slot: s, .. } if *s == slot)
            }
        }
    }
}

pub type Handler = Box<dyn FnMut(&CapsEvent)>;

/// Ordered observer list.
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<(HandlerId, Filter, Handler)>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event.
    pub fn subscribe(&mut self, handler: Handler) -> HandlerId {
        self.add(Filter::All, handler)
    }

    /// Receive `RafChanged` for one slot only.
    pub fn subscribe_raf_changed(&mut self, slot: usize, handler: Handler) -> HandlerId {
        self.add(Filter::RafChanged(slot), handler)
    }

    pub fn unsubscribe(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(hid, _, _)| *hid != id);
        self.handlers.len() != before
    }

    pub fn emit(&mut self, event: &CapsEvent) {
        tracing::debug!(?event, "emit");
        for (_, filter, handler) in &mut self.handlers {
            if filter.accepts(event) {
                handler(event);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn add(&mut self, filter: Filter, handler: Handler) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers.push((id, filter, handler));
        id
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn filters_and_unsubscribe() {
        let mut bus = EventBus::new();
        let all = Rc::new(RefCell::new(Vec::new()));
        let slot1 = Rc::new(RefCell::new(Vec::new()));

        let sink = all.clone();
        let all_id = bus.subscribe(Box::new(move |e: &CapsEvent| sink.borrow_mut().push(e.clone())));
        let sink = slot1.clone();
        bus.subscribe_raf_changed(1, Box::new(move |e: &CapsEvent| sink.borrow_mut().push(e.clone())));

        bus.emit(&CapsEvent::RafChanged { slot: 0, raf: Raf::GSM });
        bus.emit(&CapsEvent::RafChanged { slot: 1, raf: Raf::LTE });
        bus.emit(&CapsEvent::TxDone { tx_id: 3 });
        assert_eq!(all.borrow().len(), 3);
        assert_eq!(
            *slot1.borrow(),
            vec![CapsEvent::RafChanged { slot: 1, raf: Raf::LTE }]
        );

        assert!(bus.unsubscribe(all_id));
        assert!(!bus.unsubscribe(all_id));
        bus.emit(&CapsEvent::TxAborted { tx_id: 4 });
        assert_eq!(all.borrow().len(), 3);
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn event_slot() {
        assert_eq!(CapsEvent::CapsUnsupported { slot: 2 }.slot(), Some(2));
        assert_eq!(CapsEvent::TxDone { tx_id: 1 }.slot(), None);
    }
}
