/// Keeps one frame out of every `factor`, counting from the first.
#[derive(Debug, Clone)]
pub struct Decimator {
    factor: u64,
    counter: u64,
}

impl Decimator {
    /// A factor of 0 is treated as 1 (forward everything).
    pub fn new(factor: u32) -> Self {
        Self {
            factor: u64::from(factor.max(1)),
            counter: 0,
        }
    }

    /// Decide for the next produced frame. Constant time.
    pub fn admit(&mut self) -> bool {
        let keep = self.counter % self.factor == 0;
        self.counter += 1;
        keep
    }

    /// Frames seen so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }
}
