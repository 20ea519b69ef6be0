//! Shared error plumbing: an implicit source [`Location`], a catch-all
//! [`GenericError`] for binaries, and a [`Report`] that renders an error with
//! its cause chain.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{boxed::Box, string::String};
use core::{error::Error, fmt};

use ansi_term::{Color, Painted};
use snafu::{GenerateImplicitData, Snafu};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static core::panic::Location<'static>);

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Snafu)]
#[snafu(whatever, display("{message}"))]
pub struct GenericError {
    message: String,
    #[snafu(implicit)]
    location: Location,
    #[snafu(source(from(Box<dyn Error>, Some)))]
    source: Option<Box<dyn Error>>,
}

impl GenericError {
    #[must_use]
    pub fn location(&self) -> Location {
        self.location
    }
}

/// Renders an error, the place it was raised (when known) and its sources.
pub struct Report<E> {
    error: E,
    color: bool,
}

impl<E> Report<E> {
    pub fn new(error: E) -> Self {
        Self { error, color: true }
    }

    #[must_use]
    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    fn paint<T>(&self, color: Color, value: T) -> Painted<T> {
        color.paint(value).enabled(self.color)
    }
}

fn location_of(err: &(dyn Error + 'static)) -> Option<Location> {
    err.downcast_ref::<GenericError>()
        .map(GenericError::location)
}

impl<E> fmt::Debug for Report<E>
where
    E: Error + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<E> fmt::Display for Report<E>
where
    E: Error + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.paint(Color::Red, &self.error))?;
        if let Some(loc) = location_of(&self.error) {
            writeln!(f, "  at {}", self.paint(Color::DarkGray, loc))?;
        }
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {}", self.paint(Color::Red, s))?;
            if let Some(loc) = location_of(s) {
                writeln!(f, "      at {}", self.paint(Color::DarkGray, loc))?;
            }
            source = s.source();
            index += 1;
        }
        Ok(())
    }
}
