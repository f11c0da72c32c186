use std::fmt;

use serde::{Deserialize, Serialize};

/// Store-assigned identifier for one roster row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicantId(pub u64);

impl fmt::Display for ApplicantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier printed on the published applicant list. Only unique per program and date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalId(pub u32);

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramCode(pub String);

impl ProgramCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProgramCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Label of one admission-cycle day (e.g. `02.08`). Ordered as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotDate(pub String);

impl SnapshotDate {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Applicant-declared preference for a program, 1 being the most preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub fn ordered() -> [Priority; 4] {
        [Priority(1), Priority(2), Priority(3), Priority(4)]
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Zero-based bucket index.
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl TryFrom<u8> for Priority {
    type Error = PriorityOutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (1..=4).contains(&value) {
            Ok(Self(value))
        } else {
            Err(PriorityOutOfRange(i64::from(value)))
        }
    }
}

impl TryFrom<i64> for Priority {
    type Error = PriorityOutOfRange;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .map_err(|_| PriorityOutOfRange(value))
            .and_then(Priority::try_from)
            .map_err(|_| PriorityOutOfRange(value))
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("priority {0} is outside the 1-4 range")]
pub struct PriorityOutOfRange(pub i64);

/// One roster partition: every applicant of a program on a snapshot date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RosterKey {
    pub program: ProgramCode,
    pub snapshot_date: SnapshotDate,
}

impl RosterKey {
    pub fn new(program: impl Into<String>, snapshot_date: impl Into<String>) -> Self {
        Self {
            program: ProgramCode::new(program),
            snapshot_date: SnapshotDate::new(snapshot_date),
        }
    }
}

impl fmt::Display for RosterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.program, self.snapshot_date)
    }
}

/// Exam results as printed on the list. The total is supplied separately and never recomputed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectScores {
    pub physics: u32,
    pub russian: u32,
    pub math: u32,
    pub achievements: u32,
}

/// Applicant data as it arrives from an import, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApplicant {
    pub external_id: ExternalId,
    pub consent: bool,
    pub priority: Priority,
    pub scores: SubjectScores,
    pub total_score: u32,
}

/// One applicant's application to one program on one snapshot date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicantRecord {
    pub id: ApplicantId,
    pub external_id: ExternalId,
    pub program: ProgramCode,
    pub snapshot_date: SnapshotDate,
    pub consent: bool,
    pub priority: Priority,
    pub scores: SubjectScores,
    pub total_score: u32,
}

impl ApplicantRecord {
    pub fn from_new(id: ApplicantId, key: &RosterKey, applicant: NewApplicant) -> Self {
        Self {
            id,
            external_id: applicant.external_id,
            program: key.program.clone(),
            snapshot_date: key.snapshot_date.clone(),
            consent: applicant.consent,
            priority: applicant.priority,
            scores: applicant.scores,
            total_score: applicant.total_score,
        }
    }

    pub fn key(&self) -> RosterKey {
        RosterKey {
            program: self.program.clone(),
            snapshot_date: self.snapshot_date.clone(),
        }
    }

    pub fn belongs_to(&self, key: &RosterKey) -> bool {
        self.program == key.program && self.snapshot_date == key.snapshot_date
    }
}
