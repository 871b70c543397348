use trustline_core::domain::complaint::{
    ComplaintCategory, ComplaintDraft, ComplaintFilter, ComplaintStatus,
};
use trustline_core::domain::order::OrderId;
use trustline_db::{
    connect_with_settings, migrations, ComplaintRepository, InMemoryComplaintRepository,
    RepositoryError, SqlComplaintRepository,
};

type ContractResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

fn draft(category: ComplaintCategory) -> ComplaintDraft {
    ComplaintDraft {
        category,
        description: "Parcel arrived with the seal torn and one item missing.".to_owned(),
        order_id: Some(OrderId("ORD-001".to_owned())),
        evidence: vec!["receipt.txt: 2 items listed".to_owned()],
        session_id: Some("sess-contract".to_owned()),
    }
}

/// The same lifecycle contract must hold for every store implementation.
async fn exercise_store(store: &dyn ComplaintRepository) -> ContractResult {
    let record = store
        .create(draft(ComplaintCategory::MissingItem), "dialogue")
        .await
        .map_err(|error| format!("create failed: {error}"))?;
    require_eq!(record.status, ComplaintStatus::Open);

    let mut trail_lengths = Vec::new();
    let steps = [
        (ComplaintStatus::InReview, None),
        (ComplaintStatus::InReview, Some("courier contacted".to_owned())),
        (ComplaintStatus::Resolved, Some("missing item re-shipped".to_owned())),
        (ComplaintStatus::InReview, Some("customer reports it again".to_owned())),
    ];
    for (status, notes) in steps {
        store
            .update_status(&record.id, status, notes, "admin")
            .await
            .map_err(|error| format!("update to {status} failed: {error}"))?;
        let trail = store.audit_trail(&record.id).await.map_err(|error| error.to_string())?;
        trail_lengths.push(trail.len());
    }
    require!(
        trail_lengths.windows(2).all(|pair| pair[0] < pair[1]),
        "trail must grow with every accepted update: {trail_lengths:?}"
    );

    store
        .update_status(&record.id, ComplaintStatus::Open, None, "admin")
        .await
        .map_err(|error| format!("in_review -> open failed: {error}"))?;
    store
        .update_status(
            &record.id,
            ComplaintStatus::Resolved,
            Some("closed after second review".to_owned()),
            "admin",
        )
        .await
        .map_err(|error| format!("open -> resolved failed: {error}"))?;

    let invalid = store.update_status(&record.id, ComplaintStatus::Open, None, "admin").await;
    require!(
        matches!(invalid, Err(RepositoryError::Domain(_))),
        "resolved -> open must be rejected"
    );
    let trail = store.audit_trail(&record.id).await.map_err(|error| error.to_string())?;
    require_eq!(trail.len(), 7);

    let sequences: Vec<u32> = trail.iter().map(|entry| entry.sequence).collect();
    require_eq!(sequences, (1..=7).collect::<Vec<u32>>());

    let resolved = store
        .list(&ComplaintFilter { status: Some(ComplaintStatus::Resolved), ..Default::default() })
        .await
        .map_err(|error| error.to_string())?;
    require_eq!(resolved.len(), 1);
    require_eq!(resolved[0].resolution_notes.as_deref(), Some("closed after second review"));
    Ok(())
}

#[tokio::test]
async fn sql_store_honors_the_lifecycle_contract() -> ContractResult {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrate: {error}"))?;
    exercise_store(&SqlComplaintRepository::new(pool)).await
}

#[tokio::test]
async fn in_memory_store_honors_the_lifecycle_contract() -> ContractResult {
    exercise_store(&InMemoryComplaintRepository::default()).await
}
