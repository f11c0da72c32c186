use crate::cli::{
    CompareArgs, CountArgs, CutoffArgs, DateArgs, DeleteCommand, ImportArgs, PartitionArgs,
    QueryArgs, RankArgs,
};
use crate::infra::{roster_key, Workspace};
use admissions::admissions::{
    ApplicantId, ApplicantRecord, BatchProgress, BatchReport, CancellationFlag, CutoffView,
    DeletionReport, DroppedCondition, ProgramCode, ResultStatus, SnapshotDate, StatisticsView,
};
use admissions::config::AppConfig;
use admissions::error::AppError;
use admissions::telemetry;
use tracing::warn;

/// Load configuration, start logging and open the roster snapshot.
fn open() -> Result<(AppConfig, Workspace), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    let workspace = Workspace::open(&config)?;
    Ok((config, workspace))
}

pub(crate) fn run_import(args: ImportArgs) -> Result<(), AppError> {
    let (config, workspace) = open()?;
    let date = SnapshotDate::new(args.date.trim());
    let program = args.program.as_deref().map(|code| ProgramCode::new(code.trim()));
    let mut imported = Vec::new();

    for file in &args.files {
        let report = workspace
            .service
            .import_file(file, &date, program.as_ref())?;
        println!(
            "{}: {} imported into {}, {} duplicate(s), {} skipped",
            file.display(),
            report.imported,
            report.key,
            report.duplicates,
            report.skip_count()
        );
        for row in &report.skipped {
            println!("    line {}: {}", row.line, row.reason);
        }
        imported.push(report.key);
    }

    if args.rank {
        let report = workspace
            .service
            .rank_batch(&imported, &CancellationFlag::new(), print_progress);
        render_batch(&report);
    }

    workspace.persist(&config)
}

pub(crate) async fn run_rank(args: RankArgs) -> Result<(), AppError> {
    let (config, workspace) = open()?;
    let service = workspace.service.clone();

    if let (Some(program), Some(date)) = (&args.program, &args.date) {
        let outcome = service.rank(&roster_key(program, date))?;
        println!(
            "{}: cutoff {} ({} of {} places filled)",
            outcome.key,
            outcome.cutoff,
            outcome.admitted.len(),
            outcome.places
        );
        return workspace.persist(&config);
    }

    let cancellation = CancellationFlag::new();
    let interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current partition");
            interrupt.cancel();
        }
    });

    let keys = match (&args.program, &args.date) {
        (Some(program), None) => {
            let program = ProgramCode::new(program.trim());
            Some(
                service
                    .dates()?
                    .into_iter()
                    .map(|date| roster_key(program.as_str(), date.as_str()))
                    .collect::<Vec<_>>(),
            )
        }
        _ => None,
    };
    let date = args.date.as_deref().map(|date| SnapshotDate::new(date.trim()));
    let stale = args.stale;

    let report = tokio::task::spawn_blocking(move || match (keys, date) {
        (Some(keys), _) => Ok(service.rank_batch(&keys, &cancellation, print_progress)),
        (None, Some(date)) => service.rank_date(&date, &cancellation, print_progress),
        (None, None) if stale => service.recompute_stale(&cancellation, print_progress),
        (None, None) => service.rank_all(&cancellation, print_progress),
    })
    .await
    .map_err(|err| AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))??;

    render_batch(&report);
    workspace.persist(&config)
}

pub(crate) fn run_cutoffs(args: CutoffArgs) -> Result<(), AppError> {
    let (_, workspace) = open()?;
    let views = match args.date {
        Some(date) => workspace
            .service
            .cutoffs_for_date(&SnapshotDate::new(date.trim()))?,
        None => workspace.service.all_cutoffs()?,
    };

    if views.is_empty() {
        println!("no cutoffs computed yet");
        return Ok(());
    }
    render_cutoffs(&views);
    Ok(())
}

pub(crate) fn run_stats(args: DateArgs) -> Result<(), AppError> {
    let (_, workspace) = open()?;
    let views = workspace
        .service
        .statistics_for_date(&SnapshotDate::new(args.date.trim()))?;
    render_statistics(&views);
    Ok(())
}

pub(crate) fn run_admitted(args: PartitionArgs) -> Result<(), AppError> {
    let (_, workspace) = open()?;
    let outcome = workspace
        .service
        .admitted(&roster_key(&args.program, &args.date))?;

    println!(
        "{}: {} admitted of {} places, cutoff {}",
        outcome.key,
        outcome.admitted.len(),
        outcome.places,
        outcome.cutoff
    );
    render_applicants(&outcome.admitted);
    Ok(())
}

pub(crate) fn run_query(args: QueryArgs) -> Result<(), AppError> {
    let (_, workspace) = open()?;
    let scope = match (&args.program, &args.date) {
        (Some(program), Some(date)) => Some(roster_key(program, date)),
        _ => None,
    };

    let result = workspace.service.query(scope.as_ref(), &args.filters)?;
    render_dropped(&result.dropped);

    let total = result.applicants.len();
    let shown = args.limit.unwrap_or(total).min(total);
    render_applicants(&result.applicants[..shown]);
    println!("{shown} of {total} matching row(s) shown");
    Ok(())
}

pub(crate) fn run_count(args: CountArgs) -> Result<(), AppError> {
    let (_, workspace) = open()?;
    let program = args.program.map(ProgramCode::new);
    let date = args.date.map(SnapshotDate::new);
    let count = workspace.service.count(program.as_ref(), date.as_ref())?;
    println!("{count}");
    Ok(())
}

pub(crate) fn run_dates() -> Result<(), AppError> {
    let (_, workspace) = open()?;
    for date in workspace.service.dates()? {
        println!("{date}");
    }
    Ok(())
}

pub(crate) fn run_compare(args: CompareArgs) -> Result<(), AppError> {
    let (_, workspace) = open()?;
    let comparison = workspace.service.compare_dates(
        &SnapshotDate::new(args.first.trim()),
        &SnapshotDate::new(args.second.trim()),
    )?;

    for summary in [&comparison.first, &comparison.second] {
        println!(
            "{:<10} {:>6} applicant(s)  mean total {}",
            summary.snapshot_date.as_str(),
            summary.applicants,
            format_mean(summary.mean_total_score)
        );
    }
    println!(
        "{:<10} {:>+6}               {}",
        "change",
        comparison.applicant_delta,
        comparison
            .mean_total_score_delta
            .map(|delta| format!("{delta:+.2}"))
            .unwrap_or_else(|| "-".to_string())
    );
    Ok(())
}

pub(crate) fn run_delete(command: DeleteCommand) -> Result<(), AppError> {
    let (config, workspace) = open()?;
    let service = &workspace.service;

    match command {
        DeleteCommand::Id { id } => {
            let record = service.delete_by_id(ApplicantId(id))?;
            println!(
                "deleted row {} (applicant {} in {})",
                record.id,
                record.external_id,
                record.key()
            );
        }
        DeleteCommand::ExternalId {
            external_id,
            program,
            date,
        } => {
            let program = program.map(ProgramCode::new);
            let date = date.map(SnapshotDate::new);
            let report =
                service.delete_by_external_id(external_id, program.as_ref(), date.as_ref())?;
            render_deletion(&report);
        }
        DeleteCommand::Filter { filters } => {
            let report = service.delete_by_filters(&filters)?;
            render_dropped(&report.dropped);
            render_deletion(&report);
        }
        DeleteCommand::Partition(args) => {
            let key = roster_key(&args.program, &args.date);
            let removed = service.delete_partition(&key)?;
            println!("deleted {removed} row(s) and the stored results of {key}");
        }
        DeleteCommand::All { yes } => {
            if !yes {
                println!("refusing to clear the roster without --yes");
                return Ok(());
            }
            service.clear()?;
            println!("roster and results cleared");
        }
    }

    workspace.persist(&config)
}

fn print_progress(progress: &BatchProgress) {
    eprintln!(
        "[{:>3}%] {} ({}/{})",
        progress.percent(),
        progress.key,
        progress.processed,
        progress.total
    );
}

fn render_batch(report: &BatchReport) {
    for ranked in &report.ranked {
        println!(
            "{:<16} cutoff {:<16} admitted {}",
            ranked.key.to_string(),
            ranked.cutoff.label(),
            ranked.admitted
        );
    }
    for failure in &report.failed {
        println!("{:<16} FAILED: {}", failure.key.to_string(), failure.error);
    }
    if report.cancelled {
        println!("batch cancelled before every partition was ranked");
    }
}

fn render_cutoffs(views: &[CutoffView]) {
    println!(
        "{:<8} {:<10} {:>6} {:>16} {:>9} {:<12}",
        "program", "date", "places", "cutoff", "admitted", "status"
    );
    for view in views {
        println!(
            "{:<8} {:<10} {:>6} {:>16} {:>9} {:<12}",
            view.program.as_str(),
            view.snapshot_date.as_str(),
            view.places.map(|places| places.to_string()).unwrap_or_default(),
            view.label,
            view.admitted
                .map(|admitted| admitted.to_string())
                .unwrap_or_else(|| "-".to_string()),
            view.status.label()
        );
    }
}

fn render_statistics(views: &[StatisticsView]) {
    println!(
        "{:<8} {:>7} {:>7} {:>11} {:>11} {:>11} {:>11}  status",
        "program", "rows", "apps", "p1 app/adm", "p2 app/adm", "p3 app/adm", "p4 app/adm"
    );
    for view in views {
        match &view.statistics {
            Some(statistics) => {
                let cell = |applications: usize, admissions: usize| {
                    format!("{applications}/{admissions}")
                };
                println!(
                    "{:<8} {:>7} {:>7} {:>11} {:>11} {:>11} {:>11}  {}",
                    view.program.as_str(),
                    statistics.roster_size,
                    statistics.total_applications,
                    cell(
                        statistics.applications.priority_1,
                        statistics.admissions.priority_1
                    ),
                    cell(
                        statistics.applications.priority_2,
                        statistics.admissions.priority_2
                    ),
                    cell(
                        statistics.applications.priority_3,
                        statistics.admissions.priority_3
                    ),
                    cell(
                        statistics.applications.priority_4,
                        statistics.admissions.priority_4
                    ),
                    status_note(view.status)
                );
            }
            None => println!("{:<8} not ranked yet", view.program.as_str()),
        }
    }
}

fn status_note(status: ResultStatus) -> &'static str {
    match status {
        ResultStatus::Stale => "stale, rerun `rank --stale`",
        other => other.label(),
    }
}

fn render_applicants(records: &[ApplicantRecord]) {
    println!(
        "{:>7} {:>8} {:<6} {:<8} {:>3} {:>7} {:>5} {:>5} {:>5} {:>4}",
        "row", "id", "prog", "date", "pr", "consent", "phys", "rus", "math", "ach"
    );
    for record in records {
        println!(
            "{:>7} {:>8} {:<6} {:<8} {:>3} {:>7} {:>5} {:>5} {:>5} {:>4}  = {}",
            record.id.to_string(),
            record.external_id.to_string(),
            record.program.as_str(),
            record.snapshot_date.as_str(),
            record.priority.to_string(),
            if record.consent { "yes" } else { "no" },
            record.scores.physics,
            record.scores.russian,
            record.scores.math,
            record.scores.achievements,
            record.total_score
        );
    }
}

fn render_dropped(dropped: &[DroppedCondition]) {
    for condition in dropped {
        eprintln!(
            "ignored filter #{}: {}",
            condition.index + 1,
            condition.reason
        );
    }
}

fn render_deletion(report: &DeletionReport) {
    println!("deleted {} row(s)", report.deleted);
    for key in &report.affected {
        println!("    {key}: stored results are now stale");
    }
}

fn format_mean(mean: Option<f64>) -> String {
    mean.map(|mean| format!("{mean:.2}"))
        .unwrap_or_else(|| "-".to_string())
}
