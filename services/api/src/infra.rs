use admissions::admissions::{
    AdmissionsService, Combinator, ExternalId, MemoryRepository, RawCondition, RosterKey,
};
use admissions::config::AppConfig;
use admissions::error::AppError;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Roster store plus the service wired to the configured program catalog.
pub(crate) struct Workspace {
    pub(crate) repository: Arc<MemoryRepository>,
    pub(crate) service: Arc<AdmissionsService<MemoryRepository>>,
}

impl Workspace {
    pub(crate) fn open(config: &AppConfig) -> Result<Self, AppError> {
        let catalog = Arc::new(config.program_catalog()?);
        let repository = Arc::new(MemoryRepository::load(&config.storage.data_path)?);
        info!(
            path = %config.storage.data_path.display(),
            programs = catalog.len(),
            "roster workspace opened"
        );

        let service = Arc::new(AdmissionsService::new(repository.clone(), catalog));
        Ok(Self {
            repository,
            service,
        })
    }

    pub(crate) fn persist(&self, config: &AppConfig) -> Result<(), AppError> {
        self.repository.save(&config.storage.data_path)?;
        Ok(())
    }
}

pub(crate) fn roster_key(program: &str, date: &str) -> RosterKey {
    RosterKey::new(program.trim(), date.trim())
}

pub(crate) fn parse_external_id(raw: &str) -> Result<ExternalId, String> {
    raw.trim()
        .parse::<u32>()
        .map(ExternalId)
        .map_err(|err| format!("'{raw}' is not a valid applicant id ({err})"))
}

/// Parse `[and|or] <field> <operator> <value>`; `in` takes a comma-separated list.
///
/// Values stay strings; the filter coerces them to the field's type and reports
/// what it cannot use.
pub(crate) fn parse_filter(raw: &str) -> Result<RawCondition, String> {
    let mut tokens: Vec<&str> = raw.split_whitespace().collect();
    let combinator = match tokens.first().map(|token| token.to_ascii_lowercase()) {
        Some(token) if token == "or" => {
            tokens.remove(0);
            Combinator::Or
        }
        Some(token) if token == "and" => {
            tokens.remove(0);
            Combinator::And
        }
        _ => Combinator::And,
    };

    if tokens.len() < 3 {
        return Err(format!(
            "filter '{raw}' must look like '[and|or] <field> <operator> <value>'"
        ));
    }

    let field = tokens[0];
    let operator = tokens[1];
    let value = tokens[2..].join(" ");
    let value = if operator.eq_ignore_ascii_case("in") {
        Value::Array(
            value
                .split(',')
                .map(|item| Value::String(item.trim().to_string()))
                .filter(|item| item.as_str() != Some(""))
                .collect(),
        )
    } else {
        Value::String(value)
    };

    Ok(RawCondition::new(field, operator, value, combinator))
}
