//! Upgrade progress in 5% milestones

/// Percent between reported milestones
pub const MILESTONE_STEP: u32 = 5;

#[derive(Debug, Clone)]
pub struct Progress {
    total: usize,
    done: usize,
    next_milestone: u32,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            done: 0,
            next_milestone: MILESTONE_STEP,
        }
    }

    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 100;
        }
        ((self.done.min(self.total) as u64 * 100) / self.total as u64) as u32
    }

    /// Record `units` more sent; returns every milestone crossed, in order
    pub fn advance(&mut self, units: usize) -> Vec<u32> {
        self.done = self.done.saturating_add(units);
        let percent = self.percent();

        let mut crossed = Vec::new();
        while self.next_milestone <= 100 && self.next_milestone <= percent {
            crossed.push(self.next_milestone);
            self.next_milestone += MILESTONE_STEP;
        }
        crossed
    }

    pub fn is_complete(&self) -> bool {
        self.done >= self.total
    }
}

/// Log line for a reached milestone
pub fn milestone_line(percent: u32) -> String {
    format!("{}% complete\n", percent)
}
