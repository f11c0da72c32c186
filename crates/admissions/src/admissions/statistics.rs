use serde::{Deserialize, Serialize};

use super::domain::{ApplicantRecord, Priority};

/// Counts per priority level, one slot per bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityCounts {
    pub priority_1: usize,
    pub priority_2: usize,
    pub priority_3: usize,
    pub priority_4: usize,
}

impl PriorityCounts {
    pub fn get(&self, priority: Priority) -> usize {
        match priority.value() {
            1 => self.priority_1,
            2 => self.priority_2,
            3 => self.priority_3,
            _ => self.priority_4,
        }
    }

    fn record(&mut self, priority: Priority) {
        let slot = match priority.value() {
            1 => &mut self.priority_1,
            2 => &mut self.priority_2,
            3 => &mut self.priority_3,
            _ => &mut self.priority_4,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.priority_1 + self.priority_2 + self.priority_3 + self.priority_4
    }
}

/// Per-priority summary of one ranking run.
///
/// `total_applications` counts consenting applications only, the pool the ranking
/// actually competes over; `roster_size` includes rows without consent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityStatistics {
    pub total_applications: usize,
    pub roster_size: usize,
    pub applications: PriorityCounts,
    pub admissions: PriorityCounts,
}

impl PriorityStatistics {
    pub fn admitted(&self) -> usize {
        self.admissions.total()
    }
}

/// Derive the counts from one partition's rows and the admitted subset.
pub fn aggregate<'a, I>(partition: I, admitted: &[&ApplicantRecord]) -> PriorityStatistics
where
    I: IntoIterator<Item = &'a ApplicantRecord>,
{
    let mut statistics = PriorityStatistics::default();

    for record in partition {
        statistics.roster_size += 1;
        if record.consent {
            statistics.total_applications += 1;
            statistics.applications.record(record.priority);
        }
    }

    for record in admitted {
        statistics.admissions.record(record.priority);
    }

    statistics
}
