use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::admissions::domain::ProgramCode;

/// Static description of a degree program and its seat capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramDefinition {
    pub code: ProgramCode,
    pub name: String,
    pub places: usize,
}

/// Immutable set of program definitions shared by the ranking engine and reports.
///
/// Programs keep the order they were declared in; reports list them that way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramCatalog {
    programs: Vec<ProgramDefinition>,
}

impl ProgramCatalog {
    pub fn new(programs: Vec<ProgramDefinition>) -> Result<Self, ConfigError> {
        if programs.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }

        let mut seen = HashSet::new();
        for program in &programs {
            if !seen.insert(program.code.clone()) {
                return Err(ConfigError::DuplicateProgram(program.code.to_string()));
            }
            if program.places == 0 {
                return Err(ConfigError::ZeroCapacity(program.code.to_string()));
            }
        }

        Ok(Self { programs })
    }

    /// The four bachelor programs of the reference admissions campaign.
    pub fn standard() -> Self {
        let programs = [
            ("PM", "Applied Mathematics", 40),
            ("IVT", "Informatics and Computer Engineering", 50),
            ("ITSS", "Infocommunication Technologies and Communication Systems", 30),
            ("IB", "Information Security", 20),
        ]
        .into_iter()
        .map(|(code, name, places)| ProgramDefinition {
            code: ProgramCode::new(code),
            name: name.to_string(),
            places,
        })
        .collect();

        Self { programs }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let programs: Vec<ProgramDefinition> =
            serde_json::from_reader(reader).map_err(ConfigError::CatalogFormat)?;
        Self::new(programs)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| ConfigError::CatalogUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file)
    }

    pub fn get(&self, code: &ProgramCode) -> Option<&ProgramDefinition> {
        self.programs.iter().find(|program| &program.code == code)
    }

    pub fn places(&self, code: &ProgramCode) -> Option<usize> {
        self.get(code).map(|program| program.places)
    }

    pub fn programs(&self) -> &[ProgramDefinition] {
        &self.programs
    }

    pub fn codes(&self) -> impl Iterator<Item = &ProgramCode> {
        self.programs.iter().map(|program| &program.code)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

impl Default for ProgramCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
