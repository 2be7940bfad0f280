use super::{Cell, StringCell};
use core::fmt::{Display, Formatter, Result as FmtResult};
use core::hash::{Hash, Hasher};

/// RGBA display annotation carried by a row key. It plays no part in row identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(u32);

impl Color {
    pub const GRAY: Self = Self::rgb(128, 128, 128);

    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 0xFF)
    }

    #[must_use]
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self(u32::from_be_bytes([a, r, g, b]))
    }

    #[must_use]
    pub const fn from_argb(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn argb(self) -> u32 {
        self.0
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::GRAY
    }
}

/// Identity of a row within one container, plus its display color.
#[derive(Debug, Clone, Default)]
pub struct RowKey {
    pub id: Cell,
    pub color: Color,
}

impl RowKey {
    pub fn new(id: impl Into<Cell>) -> Self {
        Self {
            id: id.into(),
            color: Color::default(),
        }
    }

    /// A key whose identity is a string.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self::new(StringCell::from(name))
    }

    #[must_use]
    pub const fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }
}

impl PartialEq for RowKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RowKey {}

impl Hash for RowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for RowKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.id, f)
    }
}

/// A row key plus one cell per column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
    pub key: RowKey,
    pub cells: Vec<Cell>,
}

impl DataRow {
    #[must_use]
    pub const fn new(key: RowKey, cells: Vec<Cell>) -> Self {
        Self { key, cells }
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }
}
