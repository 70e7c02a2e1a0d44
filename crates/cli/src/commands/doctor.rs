use secrecy::ExposeSecret;
use serde::Serialize;
use taskbridge_core::config::{AppConfig, LoadOptions};
use taskbridge_core::seal::TokenSealer;
use taskbridge_db::{connect_with_settings, integrity, DbPool};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
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
    let report = build_report();

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

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_credentials(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck {
                name: "credential_readiness",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
            checks.push(DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
            checks.push(DoctorCheck {
                name: "data_integrity",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
        }
    }

    let any_fail = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_fail { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_fail {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_credentials(config: &AppConfig) -> DoctorCheck {
    match TokenSealer::from_hex_key(config.security.token_seal_key.expose_secret()) {
        Ok(_) => DoctorCheck {
            name: "credential_readiness",
            status: CheckStatus::Pass,
            details: "token formats validated by config contract; seal key decodes to 32 bytes"
                .to_string(),
        },
        Err(error) => DoctorCheck {
            name: "credential_readiness",
            status: CheckStatus::Fail,
            details: format!("seal key rejected: {error}"),
        },
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                DoctorCheck {
                    name: "data_integrity",
                    status: CheckStatus::Skipped,
                    details: "skipped because the async runtime did not start".to_string(),
                },
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    DoctorCheck {
                        name: "data_integrity",
                        status: CheckStatus::Skipped,
                        details: "skipped because the database was unreachable".to_string(),
                    },
                ];
            }
        };

        let mut checks = vec![DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        }];
        checks.push(check_integrity(&pool).await);
        pool.close().await;
        checks
    })
}

async fn check_integrity(pool: &DbPool) -> DoctorCheck {
    let migrated = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'server_links'",
    )
    .fetch_one(pool)
    .await;
    match migrated {
        Ok(0) => {
            return DoctorCheck {
                name: "data_integrity",
                status: CheckStatus::Skipped,
                details: "skipped because migrations have not been applied".to_string(),
            };
        }
        Ok(_) => {}
        Err(error) => {
            return DoctorCheck {
                name: "data_integrity",
                status: CheckStatus::Fail,
                details: format!("schema inspection failed: {error}"),
            };
        }
    }

    let report = match integrity::validate_integrity(pool).await {
        Ok(report) => report,
        Err(error) => {
            return DoctorCheck {
                name: "data_integrity",
                status: CheckStatus::Fail,
                details: format!("integrity validation failed: {error}"),
            };
        }
    };
    let stats = match integrity::collection_stats(pool).await {
        Ok(stats) => stats,
        Err(error) => {
            return DoctorCheck {
                name: "data_integrity",
                status: CheckStatus::Fail,
                details: format!("collection stats failed: {error}"),
            };
        }
    };

    if report.is_clean() {
        DoctorCheck {
            name: "data_integrity",
            status: CheckStatus::Pass,
            details: format!(
                "no orphans; {} active links, {} active task posts, {} active allowlists",
                stats.active_server_links, stats.active_task_posts, stats.active_allowlist_connections
            ),
        }
    } else {
        DoctorCheck {
            name: "data_integrity",
            status: CheckStatus::Fail,
            details: format!(
                "{} orphan task posts, {} orphan allowlist connections",
                report.orphan_tasks.len(),
                report.orphan_allowlists.len()
            ),
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
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
