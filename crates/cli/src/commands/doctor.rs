use serde::Serialize;
use trustline_agent::{client_from_config, embedder_from_config};
use trustline_core::config::{AppConfig, LoadOptions};
use trustline_db::{
    connect_from_config, migrations, KnowledgeRepository, SqlKnowledgeRepository,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report(AppConfig::load(LoadOptions::default()).map_err(|e| e.to_string()));

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(loaded: Result<AppConfig, String>) -> DoctorReport {
    let mut checks = Vec::new();

    match loaded {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_client(&config));
            checks.extend(check_storage(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error,
            });
            for name in ["llm_client", "database_connectivity", "knowledge_snapshot"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let failed = checks.iter().any(|check| {
        matches!(check.status, CheckStatus::Fail | CheckStatus::Skipped)
    });
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_client(config: &AppConfig) -> DoctorCheck {
    match client_from_config(&config.llm) {
        Ok(client) => DoctorCheck {
            name: "llm_client",
            status: CheckStatus::Pass,
            details: format!("{:?} client ready for model `{}`", config.llm.provider, client.model()),
        },
        Err(error) => {
            DoctorCheck { name: "llm_client", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

/// Database connectivity and the knowledge snapshot share one connection.
fn check_storage(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };

    runtime.block_on(async {
        let pool = match connect_from_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    DoctorCheck {
                        name: "knowledge_snapshot",
                        status: CheckStatus::Skipped,
                        details: "skipped because the database is unreachable".to_string(),
                    },
                ];
            }
        };

        let mut checks = vec![DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        }];
        let knowledge = match migrations::run_pending(&pool).await {
            Ok(()) => check_knowledge(config, &SqlKnowledgeRepository::new(pool.clone())).await,
            Err(error) => DoctorCheck {
                name: "knowledge_snapshot",
                status: CheckStatus::Fail,
                details: format!("migrations could not be applied: {error}"),
            },
        };
        checks.push(knowledge);
        pool.close().await;
        checks
    })
}

async fn check_knowledge(config: &AppConfig, snapshots: &dyn KnowledgeRepository) -> DoctorCheck {
    let embedder = match embedder_from_config(config) {
        Ok(embedder) => embedder,
        Err(error) => {
            return DoctorCheck {
                name: "knowledge_snapshot",
                status: CheckStatus::Fail,
                details: format!("embedder could not be built: {error}"),
            };
        }
    };

    match snapshots.load_latest().await {
        Ok(Some(index))
            if index.embedding_model == embedder.model_id()
                && index.dimensions == embedder.dimensions() =>
        {
            DoctorCheck {
                name: "knowledge_snapshot",
                status: CheckStatus::Pass,
                details: format!(
                    "snapshot v{} with {} chunks from {} documents",
                    index.version,
                    index.chunks.len(),
                    index.documents.len()
                ),
            }
        }
        Ok(Some(index)) => DoctorCheck {
            name: "knowledge_snapshot",
            status: CheckStatus::Warn,
            details: format!(
                "snapshot v{} was embedded with `{}`; run `trustline index` to rebuild for `{}`",
                index.version,
                index.embedding_model,
                embedder.model_id()
            ),
        },
        Ok(None) => DoctorCheck {
            name: "knowledge_snapshot",
            status: CheckStatus::Warn,
            details: "no snapshot yet; policy questions get the fallback answer until `trustline index` runs"
                .to_string(),
        },
        Err(error) => DoctorCheck {
            name: "knowledge_snapshot",
            status: CheckStatus::Fail,
            details: format!("snapshot could not be read: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
