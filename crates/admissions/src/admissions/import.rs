use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::domain::{
    ExternalId, NewApplicant, Priority, ProgramCode, RosterKey, SubjectScores,
};
use super::filter::parse_flag;

/// Header every roster CSV must carry, in any column order.
pub const ROSTER_COLUMNS: [&str; 8] = [
    "id",
    "consent",
    "priority",
    "physics_score",
    "russian_score",
    "math_score",
    "achievements_score",
    "total_score",
];

/// A row left out of an import and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    /// 1-based line in the source file, header included.
    pub line: u64,
    pub reason: String,
}

/// Parsed contents of one roster file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterImport {
    pub applicants: Vec<NewApplicant>,
    pub skipped: Vec<SkippedRow>,
}

/// Outcome of importing a file into one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub key: RosterKey,
    pub imported: usize,
    /// Rows that repeated an external id already seen earlier in the same file.
    pub duplicates: usize,
    pub skipped: Vec<SkippedRow>,
}

impl ImportReport {
    pub fn skip_count(&self) -> usize {
        self.skipped.len()
    }
}

#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    MissingColumn(&'static str),
    UnrecognisedFileName(String),
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::Io(err) => write!(f, "failed to read roster file: {}", err),
            ImportError::Csv(err) => write!(f, "roster file is not valid CSV: {}", err),
            ImportError::MissingColumn(column) => {
                write!(f, "roster file has no `{}` column", column)
            }
            ImportError::UnrecognisedFileName(name) => write!(
                f,
                "cannot derive a program from file name `{}`; expected <prefix>_<PROGRAM>.csv",
                name
            ),
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImportError::Io(err) => Some(err),
            ImportError::Csv(err) => Some(err),
            ImportError::MissingColumn(_) | ImportError::UnrecognisedFileName(_) => None,
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

/// Program code carried in a roster file name: the second `_`-separated segment,
/// without extension (`list_PM.csv` -> `PM`).
pub fn program_from_file_name<P: AsRef<Path>>(path: P) -> Result<ProgramCode, ImportError> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();

    name.split('_')
        .nth(1)
        .and_then(|segment| segment.split('.').next())
        .filter(|code| !code.is_empty())
        .map(ProgramCode::new)
        .ok_or_else(|| ImportError::UnrecognisedFileName(path.display().to_string()))
}

pub fn read_roster_file<P: AsRef<Path>>(path: P) -> Result<RosterImport, ImportError> {
    let file = std::fs::File::open(path)?;
    read_roster(file)
}

/// Parse a roster CSV. Rows that fail to parse are reported in `skipped` and never abort the read.
pub fn read_roster<R: Read>(reader: R) -> Result<RosterImport, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    if let Some(missing) = ROSTER_COLUMNS
        .iter()
        .copied()
        .find(|column| !headers.iter().any(|header| header == *column))
    {
        return Err(ImportError::MissingColumn(missing));
    }

    let mut import = RosterImport::default();
    for result in csv_reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(err) => {
                let line = err.position().map(|position| position.line()).unwrap_or(0);
                import.skipped.push(SkippedRow {
                    line,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        let line = record.position().map(|position| position.line()).unwrap_or(0);

        let parsed = record
            .deserialize::<RosterRow>(Some(&headers))
            .map_err(|err| err.to_string())
            .and_then(RosterRow::into_applicant);

        match parsed {
            Ok(applicant) => import.applicants.push(applicant),
            Err(reason) => import.skipped.push(SkippedRow { line, reason }),
        }
    }

    Ok(import)
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    id: u32,
    consent: String,
    priority: i64,
    physics_score: u32,
    russian_score: u32,
    math_score: u32,
    achievements_score: u32,
    total_score: u32,
}

impl RosterRow {
    fn into_applicant(self) -> Result<NewApplicant, String> {
        let consent = parse_flag(&self.consent)
            .ok_or_else(|| format!("consent `{}` is not a yes/no value", self.consent))?;
        let priority = Priority::try_from(self.priority).map_err(|err| err.to_string())?;

        Ok(NewApplicant {
            external_id: ExternalId(self.id),
            consent,
            priority,
            scores: SubjectScores {
                physics: self.physics_score,
                russian: self.russian_score,
                math: self.math_score,
                achievements: self.achievements_score,
            },
            total_score: self.total_score,
        })
    }
}
