use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;
use trustline_core::domain::complaint::{
    ComplaintAuditEntry, ComplaintCategory, ComplaintFilter, ComplaintId, ComplaintRecord,
    ComplaintStatus,
};
use trustline_core::domain::order::OrderId;
use trustline_db::{ComplaintRepository, RepositoryError, SqlComplaintRepository};

use crate::commands::{async_runtime, load_config, migrated_pool, CommandResult, StepError};

pub const DEFAULT_ACTOR: &str = "operator";

#[derive(Debug, Default, Clone)]
pub struct ListOptions {
    pub status: Option<String>,
    pub category: Option<String>,
    pub order_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
struct ComplaintDetail {
    complaint: ComplaintRecord,
    audit_trail: Vec<ComplaintAuditEntry>,
}

pub fn list(options: ListOptions) -> CommandResult {
    let filter = match parse_filter(&options) {
        Ok(filter) => filter,
        Err(message) => return CommandResult::failure("complaints", "invalid_filter", message, 2),
    };
    with_repository(|repo| async move { repo.list(&filter).await }, |records| {
        CommandResult::data("complaints", &records)
    })
}

pub fn show(id: String) -> CommandResult {
    let id = ComplaintId(id);
    with_repository(
        |repo| async move {
            let Some(complaint) = repo.find_by_id(&id).await? else {
                return Err(RepositoryError::NotFound { entity: "complaint", id: id.0.clone() });
            };
            let audit_trail = repo.audit_trail(&id).await?;
            Ok(ComplaintDetail { complaint, audit_trail })
        },
        |detail| CommandResult::data("complaints", &detail),
    )
}

pub fn update(id: String, status: String, notes: Option<String>, actor: Option<String>) -> CommandResult {
    let Some(status) = ComplaintStatus::parse(&status) else {
        return CommandResult::failure(
            "complaints",
            "invalid_status",
            format!("unknown status `{status}`; expected open, in_review, resolved or rejected"),
            2,
        );
    };
    let actor = actor.filter(|actor| !actor.trim().is_empty()).unwrap_or_else(|| DEFAULT_ACTOR.to_string());
    let notes = notes.filter(|notes| !notes.trim().is_empty());
    let id = ComplaintId(id);
    with_repository(
        |repo| async move { repo.update_status(&id, status, notes, &actor).await },
        |entry| {
            info!(
                event_name = "cli.complaints.status_updated",
                complaint_id = %entry.complaint_id,
                to_status = %entry.to_status,
                sequence = entry.sequence,
                actor = %entry.actor,
                "complaint status updated"
            );
            CommandResult::success(
                "complaints",
                format!(
                    "complaint {} moved {} -> {} (entry #{})",
                    entry.complaint_id,
                    entry.from_status.map(|from| from.as_str()).unwrap_or("new"),
                    entry.to_status,
                    entry.sequence
                ),
            )
        },
    )
}

/// Runs `operation` against the configured database and renders its result.
fn with_repository<T, F, Fut>(
    operation: F,
    render: impl FnOnce(T) -> CommandResult,
) -> CommandResult
where
    F: FnOnce(SqlComplaintRepository) -> Fut,
    Fut: std::future::Future<Output = Result<T, RepositoryError>>,
{
    let config = match load_config("complaints") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("complaints") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let outcome = operation(SqlComplaintRepository::new(pool.clone())).await;
        pool.close().await;
        outcome.map_err(|error| classify(&error))
    });

    match result {
        Ok(value) => render(value),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("complaints", error_class, message, exit_code)
        }
    }
}

fn classify(error: &RepositoryError) -> StepError {
    match error {
        RepositoryError::NotFound { .. } => ("not_found", error.to_string(), 8),
        RepositoryError::Domain(_) => ("invalid_transition", error.to_string(), 9),
        _ => ("persistence", error.to_string(), 5),
    }
}

fn parse_filter(options: &ListOptions) -> Result<ComplaintFilter, String> {
    let status = options
        .status
        .as_deref()
        .map(|raw| ComplaintStatus::parse(raw).ok_or_else(|| format!("unknown status `{raw}`")))
        .transpose()?;
    let category = options
        .category
        .as_deref()
        .map(|raw| ComplaintCategory::parse(raw).ok_or_else(|| format!("unknown category `{raw}`")))
        .transpose()?;
    Ok(ComplaintFilter {
        status,
        category,
        created_from: options.from.as_deref().map(parse_instant).transpose()?,
        created_to: options.to.as_deref().map(parse_instant).transpose()?,
        order_id: options.order_id.clone().map(OrderId),
    })
}

/// RFC 3339 timestamp or a bare `YYYY-MM-DD`, read as midnight UTC.
fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .ok_or_else(|| format!("`{raw}` is neither an RFC 3339 timestamp nor a YYYY-MM-DD date"))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use trustline_core::domain::complaint::{ComplaintCategory, ComplaintStatus};

    use super::{parse_filter, parse_instant, ListOptions};

    #[test]
    fn filter_accepts_loose_spellings() {
        let filter = parse_filter(&ListOptions {
            status: Some("In Review".to_string()),
            category: Some("late-delivery".to_string()),
            order_id: Some("ORD-002".to_string()),
            from: Some("2026-03-01".to_string()),
            to: None,
        })
        .expect("filter");

        assert_eq!(filter.status, Some(ComplaintStatus::InReview));
        assert_eq!(filter.category, Some(ComplaintCategory::LateDelivery));
        assert_eq!(filter.created_from, Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()));
        assert_eq!(filter.order_id.map(|id| id.0), Some("ORD-002".to_string()));
    }

    #[test]
    fn filter_rejects_unknown_values() {
        let error = parse_filter(&ListOptions {
            status: Some("archived".to_string()),
            ..ListOptions::default()
        })
        .expect_err("unknown status");
        assert!(error.contains("archived"));

        assert!(parse_instant("last tuesday").is_err());
        assert_eq!(
            parse_instant("2026-03-01T10:30:00+03:00").expect("rfc3339"),
            Utc.with_ymd_and_hms(2026, 3, 1, 7, 30, 0).unwrap()
        );
    }
}
