//! Minimal ANSI SGR painting for terminal output.
//!
//! Values are wrapped in a [`Painted`] adapter which emits the escape
//! sequence around the wrapped value's `Display` output. Painting can be
//! switched off per value, which is how callers honour `--no-color`.

#![cfg_attr(not(test), no_std)]

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    DarkGray,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    Default,
}

impl Color {
    const fn fg(self) -> u8 {
        match self {
            Self::DarkGray => 90,
            Self::Red => 31,
            Self::Green => 32,
            Self::Yellow => 33,
            Self::Blue => 34,
            Self::Magenta => 35,
            Self::Cyan => 36,
            Self::Default => 39,
        }
    }

    /// Wraps `value` so that it is displayed in bold with this foreground
    /// color.
    pub const fn paint<T>(self, value: T) -> Painted<T> {
        Painted {
            color: self,
            enabled: true,
            value,
        }
    }
}

pub struct Painted<T> {
    color: Color,
    enabled: bool,
    value: T,
}

impl<T> Painted<T> {
    /// Turns the escape sequences on or off.
    #[must_use]
    pub const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl<T> fmt::Display for Painted<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = &self.value;
        if !self.enabled {
            return write!(f, "{value}");
        }
        let fg = self.color.fg();
        write!(f, "\x1B[{fg};1m{value}\x1B[0m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paint() {
        assert_eq!(
            Color::Red.paint("error").to_string(),
            "\x1B[31;1merror\x1B[0m"
        );
        assert_eq!(
            Color::DarkGray.paint(42).to_string(),
            "\x1B[90;1m42\x1B[0m"
        );
    }

    #[test]
    fn test_disabled() {
        assert_eq!(Color::Green.paint("ok").enabled(false).to_string(), "ok");
    }
}
