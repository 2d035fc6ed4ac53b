//! Keyboard device.
//!
//! A single 32-bit read-only register. Each read pops the oldest pending
//! event, or 0 when the queue is empty. An event is the key's scancode with
//! bit 15 set for key-down and clear for key-up.

use std::collections::VecDeque;

/// Key-down flag in the event word.
pub const KEYDOWN_MASK: u32 = 0x8000;

/// Guest scancodes. The discriminants are the wire values; 0 is reserved
/// for "no event".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Key {
    Escape = 1,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    Grave,
    Num1,
    Num2,
    Num3,
    Num4,
    Num5,
    Num6,
    Num7,
    Num8,
    Num9,
    Num0,
    Minus,
    Equals,
    Backspace,
    Tab,
    Q,
    W,
    E,
    R,
    T,
    Y,
    U,
    I,
    O,
    P,
    LeftBracket,
    RightBracket,
    Backslash,
    CapsLock,
    A,
    S,
    D,
    F,
    G,
    H,
    J,
    K,
    L,
    Semicolon,
    Apostrophe,
    Return,
    LeftShift,
    Z,
    X,
    C,
    V,
    B,
    N,
    M,
    Comma,
    Period,
    Slash,
    RightShift,
    LeftCtrl,
    Application,
    LeftAlt,
    Space,
    RightAlt,
    RightCtrl,
    Up,
    Down,
    Left,
    Right,
    Insert,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
}

/// Pending key events, oldest first.
pub struct Keyboard {
    queue: VecDeque<u32>,
}

impl Keyboard {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Enqueue a key press or release from the host.
    pub fn key_event(&mut self, key: Key, down: bool) {
        let mut code = key as u32;
        if down {
            code |= KEYDOWN_MASK;
        }
        self.queue.push_back(code);
    }

    /// Device callback: before a read, pop the oldest event (or 0) into the
    /// backing word.
    pub fn handle(&mut self, data: &mut [u8], offset: usize, _len: usize, is_write: bool) {
        if is_write || offset != 0 {
            return;
        }
        let code = self.queue.pop_front().unwrap_or(0);
        data[0..4].copy_from_slice(&code.to_le_bytes());
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(kbd: &mut Keyboard) -> u32 {
        let mut data = [0u8; 4];
        kbd.handle(&mut data, 0, 4, false);
        u32::from_le_bytes(data)
    }

    #[test]
    fn events_pop_oldest_first() {
        let mut kbd = Keyboard::new();
        kbd.key_event(Key::A, true);
        kbd.key_event(Key::A, false);

        let down = read(&mut kbd);
        assert_eq!(down & KEYDOWN_MASK, KEYDOWN_MASK);
        assert_eq!(down & !KEYDOWN_MASK, Key::A as u32);

        let up = read(&mut kbd);
        assert_eq!(up & KEYDOWN_MASK, 0);
        assert_eq!(up, Key::A as u32);
    }

    #[test]
    fn empty_queue_reads_zero() {
        let mut kbd = Keyboard::new();
        assert_eq!(read(&mut kbd), 0);
    }
}
