//! Mock scanner for testing and development.
//!
//! [`MockScanner`] is owned by the scanner service like any other source;
//! the cloneable [`MockScannerHandle`] types into it, with or without
//! realistic inter-key gaps, and can pull the cable.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::SourceError;
use crate::source::KeystrokeSource;

#[derive(Debug)]
enum MockKey {
    Char(char),
    Unplug,
}

#[derive(Debug)]
struct MockScannerState {
    online: bool,
    open: bool,
    open_attempts: u32,
}

/// Simulated scanner driven by a [`MockScannerHandle`].
///
/// # Examples
///
/// ```
/// use parkpos_scanner::mock::MockScanner;
/// use parkpos_scanner::source::KeystrokeSource;
///
/// # #[tokio::main]
/// # async fn main() {
/// let (mut scanner, handle) = MockScanner::new();
/// scanner.open().await.unwrap();
///
/// handle.type_text("T1");
/// assert_eq!(scanner.next_key().await.unwrap(), 'T');
/// assert_eq!(scanner.next_key().await.unwrap(), '1');
/// # }
/// ```
#[derive(Debug)]
pub struct MockScanner {
    keys: mpsc::UnboundedReceiver<MockKey>,
    state: Arc<Mutex<MockScannerState>>,
    name: String,
}

impl MockScanner {
    pub fn new() -> (Self, MockScannerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(MockScannerState {
            online: true,
            open: false,
            open_attempts: 0,
        }));
        let scanner = Self {
            keys: rx,
            state: Arc::clone(&state),
            name: "mock://scanner".to_string(),
        };
        (scanner, MockScannerHandle { keys: tx, state })
    }
}

impl KeystrokeSource for MockScanner {
    async fn open(&mut self) -> Result<(), SourceError> {
        let mut state = self.state.lock();
        state.open_attempts += 1;
        if !state.online {
            return Err(SourceError::unavailable(&self.name, "mock scanner unplugged"));
        }
        state.open = true;
        Ok(())
    }

    async fn next_key(&mut self) -> Result<char, SourceError> {
        if !self.state.lock().open {
            return Err(SourceError::disconnected(&self.name));
        }
        match self.keys.recv().await {
            Some(MockKey::Char(c)) => Ok(c),
            Some(MockKey::Unplug) | None => {
                self.state.lock().open = false;
                Err(SourceError::disconnected(&self.name))
            }
        }
    }

    async fn close(&mut self) {
        self.state.lock().open = false;
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Handle for typing into a [`MockScanner`]. Clone it freely.
#[derive(Debug, Clone)]
pub struct MockScannerHandle {
    keys: mpsc::UnboundedSender<MockKey>,
    state: Arc<Mutex<MockScannerState>>,
}

impl MockScannerHandle {
    /// Queue `text` all at once, as a scanner with no inter-key delay.
    pub fn type_text(&self, text: &str) {
        for c in text.chars() {
            let _ = self.keys.send(MockKey::Char(c));
        }
    }

    /// Type `text` with `gap` between keystrokes.
    pub async fn send_burst(&self, text: &str, gap: Duration) {
        for (i, c) in text.chars().enumerate() {
            if i > 0 {
                tokio::time::sleep(gap).await;
            }
            let _ = self.keys.send(MockKey::Char(c));
        }
    }

    /// Pull the cable: the current read fails and reopening is refused
    /// until [`set_online`](Self::set_online) is called.
    pub fn unplug(&self) {
        self.state.lock().online = false;
        let _ = self.keys.send(MockKey::Unplug);
    }

    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn open_attempts(&self) -> u32 {
        self.state.lock().open_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_unplug_and_reopen() {
        let (mut scanner, handle) = MockScanner::new();
        scanner.open().await.unwrap();

        handle.unplug();
        assert!(scanner.next_key().await.is_err());
        assert!(!handle.is_open());
        assert!(scanner.open().await.is_err());

        handle.set_online(true);
        scanner.open().await.unwrap();
        handle.type_text("A");
        assert_eq!(scanner.next_key().await.unwrap(), 'A');
        assert_eq!(handle.open_attempts(), 3);
    }
}
