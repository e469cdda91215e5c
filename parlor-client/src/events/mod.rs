//! Typed event dispatcher: one subscriber list per event name, invoked
//! synchronously in registration order. Subscribing returns a token the
//! caller uses to unsubscribe.

use std::collections::HashMap;
use std::rc::Rc;

pub struct EventBus<P> {
    handlers: HashMap<String, Vec<(u64, Rc<dyn Fn(&P)>)>>,
    next_token: u64,
}

impl<P> Default for EventBus<P> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            next_token: 1,
        }
    }
}

impl<P> EventBus<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, event: &str, handler: Rc<dyn Fn(&P)>) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push((token, handler));
        token
    }

    pub fn off(&mut self, event: &str, token: u64) -> bool {
        let Some(list) = self.handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(t, _)| *t != token);
        before != list.len()
    }

    /// Snapshot of the subscriber list for `event`. The caller invokes the
    /// handlers after releasing any borrow of the surrounding state, so a
    /// handler may re-enter the engine.
    pub fn subscribers(&self, event: &str) -> Vec<Rc<dyn Fn(&P)>> {
        self.handlers
            .get(event)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    pub fn emit(&self, event: &str, payload: &P) {
        for handler in self.subscribers(event) {
            handler(payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn handlers_run_in_registration_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus: EventBus<String> = EventBus::new();

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.on(
                "status",
                Rc::new(move |payload: &String| {
                    seen.borrow_mut().push(format!("{tag}:{payload}"));
                }),
            );
        }

        bus.emit("status", &"go".to_string());
        assert_eq!(
            *seen.borrow(),
            vec!["first:go", "second:go", "third:go"]
        );
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let seen = Rc::new(RefCell::new(0u32));
        let mut bus: EventBus<String> = EventBus::new();

        let seen_a = seen.clone();
        let a = bus.on("tick", Rc::new(move |_: &String| *seen_a.borrow_mut() += 1));
        let seen_b = seen.clone();
        let _b = bus.on("tick", Rc::new(move |_: &String| *seen_b.borrow_mut() += 10));

        assert!(bus.off("tick", a));
        assert!(!bus.off("tick", a));

        bus.emit("tick", &String::new());
        assert_eq!(*seen.borrow(), 10);
    }

    #[test]
    fn events_are_isolated_by_name() {
        let seen = Rc::new(RefCell::new(0u32));
        let mut bus: EventBus<String> = EventBus::new();

        let counter = seen.clone();
        bus.on("a", Rc::new(move |_: &String| *counter.borrow_mut() += 1));

        bus.emit("b", &String::new());
        assert_eq!(*seen.borrow(), 0);
    }
}
