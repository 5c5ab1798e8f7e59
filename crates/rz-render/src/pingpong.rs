//! Double-buffered resources

/// Two resources where a pass reads one and writes the other
///
/// After the pass the roles swap, so the freshly written one is read next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPong<T> {
    pair: [T; 2],
    flipped: bool,
}

impl<T: Copy> PingPong<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            pair: [a, b],
            flipped: false,
        }
    }

    /// The resource passes read from
    pub fn current(&self) -> T {
        self.pair[usize::from(self.flipped)]
    }

    /// The resource passes write to
    pub fn other(&self) -> T {
        self.pair[usize::from(!self.flipped)]
    }

    pub fn swap(&mut self) {
        self.flipped = !self.flipped;
    }

    /// Make the first resource current again
    pub fn reset(&mut self) {
        self.flipped = false;
    }

    pub fn both(&self) -> [T; 2] {
        self.pair
    }
}
