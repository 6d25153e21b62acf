//! Process-wide venue connection state
//!
//! Connect/disconnect and the demo-mode toggle affect every bot at once,
//! so the state lives in one injected service with thread-safe accessors
//! instead of module-level globals.

use std::sync::atomic::{AtomicBool, Ordering};

/// Shared connection state for the trading venue
#[derive(Debug)]
pub struct ConnectionManager {
    connected: AtomicBool,
    demo: AtomicBool,
}

impl ConnectionManager {
    pub fn new(demo_mode: bool) -> Self {
        Self {
            connected: AtomicBool::new(false),
            demo: AtomicBool::new(demo_mode),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_demo(&self) -> bool {
        self.demo.load(Ordering::SeqCst)
    }

    /// Mark the venue connection live. Returns true when this call changed
    /// the state, i.e. the connection is newly established.
    pub fn connect(&self) -> bool {
        !self.connected.swap(true, Ordering::SeqCst)
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Flip demo mode; the venue connection must be re-established
    pub fn set_demo_mode(&self, demo: bool) {
        self.demo.store(demo, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let conn = ConnectionManager::new(true);
        assert!(!conn.is_connected());
        assert!(conn.is_demo());
    }

    #[test]
    fn connect_reports_transitions_once() {
        let conn = ConnectionManager::new(false);
        assert!(conn.connect());
        assert!(!conn.connect());
        conn.disconnect();
        assert!(conn.connect());
    }

    #[test]
    fn demo_toggle_drops_the_connection() {
        let conn = ConnectionManager::new(false);
        conn.connect();
        conn.set_demo_mode(true);
        assert!(conn.is_demo());
        assert!(!conn.is_connected());
    }
}
