//! Fixed-capacity rolling windows of observations.
//!
//! Statistics are defined only once the window is full. Standard deviation
//! uses the population formula (divide by n) throughout, so z-scores are
//! comparable between the two window implementations.

/// Mean and population standard deviation of a full window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Contract shared by every baseline window the sampler can run on.
pub trait BaselineWindow {
    fn with_capacity(capacity: usize) -> Self
    where
        Self: Sized;

    /// Append an observation, evicting the oldest once at capacity.
    fn push(&mut self, value: f64);

    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `None` until the window is full
    fn mean(&self) -> Option<f64>;

    /// `None` until the window is full; exactly 0.0 for constant input
    fn std_dev(&self) -> Option<f64>;

    fn stats(&self) -> Option<WindowStats> {
        Some(WindowStats {
            mean: self.mean()?,
            std_dev: self.std_dev()?,
        })
    }
}

/// Ring buffer that recomputes its statistics on demand in O(capacity).
#[derive(Debug, Clone)]
pub struct RollingWindow {
    data: Vec<f64>,
    head: usize,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    /// Observations in insertion order, oldest first
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let (newer, older) = self.data.split_at(self.head);
        older.iter().chain(newer.iter()).copied()
    }
}

impl BaselineWindow for RollingWindow {
    fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity)
    }

    fn push(&mut self, value: f64) {
        if self.data.len() < self.capacity {
            self.data.push(value);
        } else {
            self.data[self.head] = value;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn mean(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        // Shifted by the first element: exact for constant windows.
        let pivot = self.data[0];
        let offset = self.data.iter().map(|v| v - pivot).sum::<f64>() / self.capacity as f64;
        Some(pivot + offset)
    }

    fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self
            .data
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / self.capacity as f64;
        Some(variance.max(0.0).sqrt())
    }
}

/// O(1) variant keeping a running sum and sum of squares.
///
/// The sums are rebuilt from the buffer every `capacity` evictions so that
/// subtract-on-evict cancellation error cannot accumulate without bound.
#[derive(Debug, Clone)]
pub struct IncrementalWindow {
    ring: RollingWindow,
    sum: f64,
    sum_sq: f64,
    evictions: usize,
    last: Option<f64>,
    /// Length of the trailing run of identical values
    run: usize,
}

impl IncrementalWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RollingWindow::new(capacity),
            sum: 0.0,
            sum_sq: 0.0,
            evictions: 0,
            last: None,
            run: 0,
        }
    }

    fn resync(&mut self) {
        self.sum = self.ring.iter().sum();
        self.sum_sq = self.ring.iter().map(|v| v * v).sum();
        self.evictions = 0;
    }

    fn all_equal(&self) -> bool {
        self.run >= self.ring.len()
    }
}

impl BaselineWindow for IncrementalWindow {
    fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity)
    }

    fn push(&mut self, value: f64) {
        if self.ring.is_full() {
            let evicted = self.ring.data[self.ring.head];
            self.sum -= evicted;
            self.sum_sq -= evicted * evicted;
            self.evictions += 1;
        }
        self.ring.push(value);
        self.sum += value;
        self.sum_sq += value * value;

        self.run = if self.last == Some(value) { self.run + 1 } else { 1 };
        self.last = Some(value);

        if self.evictions >= self.ring.capacity {
            self.resync();
        }
    }

    fn len(&self) -> usize {
        self.ring.len()
    }

    fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    fn mean(&self) -> Option<f64> {
        if !self.is_full() {
            return None;
        }
        Some(self.sum / self.capacity() as f64)
    }

    fn std_dev(&self) -> Option<f64> {
        let mean = self.mean()?;
        // Running sums leave a tiny residue for constant input.
        if self.all_equal() {
            return Some(0.0);
        }
        let n = self.capacity() as f64;
        let variance = self.sum_sq / n - mean * mean;
        Some(variance.max(0.0).sqrt())
    }
}
