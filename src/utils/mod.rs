use std::fmt;

/// Axis of a two-dimensional matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ROW,
    COLUMN,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ROW => write!(f, "row"),
            Direction::COLUMN => write!(f, "column"),
        }
    }
}

pub trait ZeroVec {
    fn zero_len(&mut self, len: usize);
}

impl<T: Default + Clone> ZeroVec for Vec<T> {
    fn zero_len(&mut self, len: usize) {
        self.clear();
        self.reserve(len);
        self.extend(std::iter::repeat_n(T::default(), len));
    }
}

/// A dense line of `len` zeros.
pub(crate) fn zero_line(len: usize) -> Vec<f32> {
    let mut line = Vec::new();
    line.zero_len(len);
    line
}
