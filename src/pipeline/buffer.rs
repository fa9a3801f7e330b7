//! Open batch of a write pipeline

/// Requests accumulated since the last swap.
#[derive(Debug)]
pub struct WriteBuffer<R> {
    requests: Vec<R>,
    capacity: usize,
}

impl<R> WriteBuffer<R> {
    /// Creates an empty buffer that fills at `capacity` requests.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            requests: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a request; returns true once the buffer is full.
    pub fn push(&mut self, request: R) -> bool {
        self.requests.push(request);
        self.is_full()
    }

    /// Swaps the open batch out, leaving a fresh empty one in place.
    pub fn take(&mut self) -> Vec<R> {
        std::mem::replace(&mut self.requests, Vec::with_capacity(self.capacity))
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.requests.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fill level in `[0, 1]`.
    pub fn fullness_ratio(&self) -> f64 {
        self.requests.len() as f64 / self.capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_reports_full_at_capacity() {
        let mut buffer = WriteBuffer::new(3);
        assert!(!buffer.push(1));
        assert!(!buffer.push(2));
        assert!(buffer.push(3));
        assert_eq!(buffer.fullness_ratio(), 1.0);
    }

    #[test]
    fn take_leaves_an_empty_batch() {
        let mut buffer = WriteBuffer::new(10);
        buffer.push("a");
        buffer.push("b");

        let batch = buffer.take();
        assert_eq!(batch, vec!["a", "b"]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 10);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut buffer = WriteBuffer::new(0);
        assert!(buffer.push(()));
    }
}
