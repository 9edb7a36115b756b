// Median of the most recent pinger readings, so single outliers are ignored

pub const MEDIAN_WINDOW: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct MedianFilter {
    samples: [f32; MEDIAN_WINDOW],
    len: usize,
    next: usize,
}

impl MedianFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f32) {
        self.samples[self.next] = value;
        self.next = (self.next + 1) % MEDIAN_WINDOW;
        self.len = (self.len + 1).min(MEDIAN_WINDOW);
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.next = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Median of the buffered samples (upper median while fewer than the window)
    pub fn median(&self) -> Option<f32> {
        if self.len == 0 {
            return None;
        }
        let mut sorted = [0.0f32; MEDIAN_WINDOW];
        sorted[..self.len].copy_from_slice(&self.samples[..self.len]);
        let sorted = &mut sorted[..self.len];
        sorted.sort_by(f32::total_cmp);
        Some(sorted[self.len / 2])
    }
}
