//! # Operator input
//!
//! The operator drives the throttle with three keys:
//!
//! | Key | Command |
//! |-----|---------|
//! | ↑ | [Command::Increase] |
//! | ↓ | [Command::Decrease] |
//! | Esc | [Command::Quit] |
//!
//! The terminal is put in raw mode to get single key presses, which also swallows the interrupt signal, so Ctrl-C is
//! mapped to [Command::Quit] as well. Every other key is ignored.
//!
//! [KeyboardListener] reads the terminal from a dedicated thread and forwards commands over a flume channel, the
//! receiving end is handed to the [TeleopController](crate::session::TeleopController).

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use log::{debug, warn};

use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Throttle operator command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Step the thrust up
    Increase,
    /// Step the thrust down
    Decrease,
    /// Orderly shutdown
    Quit,
}

/// Map a key press to a command, `None` for keys without a meaning
pub fn command_for_key(key: &KeyEvent) -> Option<Command> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Up => Some(Command::Increase),
        KeyCode::Down => Some(Command::Decrease),
        KeyCode::Esc => Some(Command::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Command::Quit),
        _ => None,
    }
}

/// Terminal keyboard reader
///
/// Raw mode is enabled on spawn and restored when the listener is stopped or dropped.
pub struct KeyboardListener {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl KeyboardListener {
    /// Start reading the terminal, sending commands on `commands`
    ///
    /// The reader ends when the receiving side of `commands` is dropped.
    pub fn spawn(commands: flume::Sender<Command>) -> Result<Self> {
        terminal::enable_raw_mode().map_err(|e| Error::Terminal(e.to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let thread = thread::Builder::new()
            .name("keyboard".into())
            .spawn(move || read_keys(&commands, &stop_thread))
            .map_err(|e| {
                let _ = terminal::disable_raw_mode();
                Error::Terminal(e.to_string())
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stop the reader and restore the terminal
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Keyboard thread panicked");
            }
            if let Err(e) = terminal::disable_raw_mode() {
                warn!("Could not restore terminal: {}", e);
            }
        }
    }
}

impl Drop for KeyboardListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_keys(commands: &flume::Sender<Command>, stop: &AtomicBool) {
    while !stop.load(Relaxed) {
        match event::poll(POLL_INTERVAL) {
            Ok(false) => continue,
            Ok(true) => (),
            Err(e) => {
                warn!("Keyboard poll error: {}", e);
                return;
            }
        }

        match event::read() {
            Ok(Event::Key(key)) => {
                if let Some(command) = command_for_key(&key) {
                    if commands.send(command).is_err() {
                        debug!("Command receiver gone, keyboard reader stopping");
                        return;
                    }
                }
            }
            Ok(_) => (),
            Err(e) => {
                warn!("Keyboard read error: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn arrows_and_escape_map_to_commands() {
        assert_eq!(command_for_key(&press(KeyCode::Up)), Some(Command::Increase));
        assert_eq!(command_for_key(&press(KeyCode::Down)), Some(Command::Decrease));
        assert_eq!(command_for_key(&press(KeyCode::Esc)), Some(Command::Quit));
    }

    #[test]
    fn ctrl_c_quits() {
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(command_for_key(&key), Some(Command::Quit));
    }

    #[test]
    fn other_keys_are_ignored() {
        for code in [
            KeyCode::Left,
            KeyCode::Right,
            KeyCode::Enter,
            KeyCode::Char('c'),
            KeyCode::Char('q'),
            KeyCode::F(1),
        ] {
            assert_eq!(command_for_key(&press(code)), None, "{:?}", code);
        }
    }

    #[test]
    fn key_release_is_ignored() {
        let mut key = press(KeyCode::Up);
        key.kind = KeyEventKind::Release;
        assert_eq!(command_for_key(&key), None);
    }
}
