use serde_json::json;

use crate::util::{api_request, raw_api_request};

pub async fn status(api_url: &str, token: &str, raw: bool) -> i32 {
    api_request(
        api_url,
        reqwest::Method::GET,
        "/v1/system/status",
        Some(token),
        None,
        &[],
        &[],
        raw,
        false,
    )
    .await
}

/// Reachability, admin access and current load in one report.
pub async fn doctor(api_url: &str, token: Option<&str>) -> i32 {
    let mut checks: Vec<serde_json::Value> = Vec::new();
    let mut overall = "ok";

    // 1. API reachable
    match raw_api_request(api_url, reqwest::Method::GET, "/health", None).await {
        Ok((200, body)) => {
            let version = body
                .get("version")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            let store = body
                .get("trust_store")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            checks.push(json!({
                "name": "api_reachable",
                "status": "ok",
                "detail": format!("{api_url} (v{version}, trust store: {store})")
            }));
            if store == "memory" {
                overall = "warn";
                checks.push(json!({
                    "name": "trust_store",
                    "status": "warn",
                    "detail": "In-memory trust store; violations and engagement are lost on restart. Set DATABASE_URL on the server."
                }));
            }
        }
        Ok((status, _)) => {
            overall = "error";
            checks.push(json!({
                "name": "api_reachable",
                "status": "error",
                "detail": format!("{api_url} returned HTTP {status}")
            }));
        }
        Err(e) => {
            checks.push(json!({
                "name": "api_reachable",
                "status": "error",
                "detail": format!("{api_url}: {e}")
            }));
            // No point continuing if API is unreachable
            let output = json!({ "checks": checks, "overall": "error" });
            eprintln!("{}", serde_json::to_string_pretty(&output).unwrap());
            return 1;
        }
    }

    // 2. Admin access and system load
    match token {
        None => {
            if overall == "ok" {
                overall = "warn";
            }
            checks.push(json!({
                "name": "admin_access",
                "status": "warn",
                "detail": "No admin token. Set RISKGATE_ADMIN_TOKEN to include system status."
            }));
        }
        Some(t) => {
            match raw_api_request(api_url, reqwest::Method::GET, "/v1/system/status", Some(t))
                .await
            {
                Ok((200, body)) => {
                    checks.push(json!({
                        "name": "admin_access",
                        "status": "ok",
                        "detail": "admin token accepted"
                    }));
                    let (status, detail) = load_check(&body);
                    if status != "ok" && overall == "ok" {
                        overall = "warn";
                    }
                    checks.push(json!({
                        "name": "system_load",
                        "status": status,
                        "detail": detail
                    }));
                }
                Ok((403, _)) => {
                    if overall == "ok" {
                        overall = "warn";
                    }
                    checks.push(json!({
                        "name": "admin_access",
                        "status": "warn",
                        "detail": "Admin API disabled on the server (RISKGATE_ADMIN_TOKEN_SHA256 not set)"
                    }));
                }
                Ok((status, _)) => {
                    overall = "error";
                    checks.push(json!({
                        "name": "admin_access",
                        "status": "error",
                        "detail": format!("HTTP {status} on /v1/system/status")
                    }));
                }
                Err(e) => {
                    overall = "error";
                    checks.push(json!({
                        "name": "admin_access",
                        "status": "error",
                        "detail": format!("{e}")
                    }));
                }
            }
        }
    }

    let output = json!({
        "checks": checks,
        "overall": overall
    });

    if overall == "error" {
        eprintln!("{}", serde_json::to_string_pretty(&output).unwrap());
        1
    } else {
        println!("{}", serde_json::to_string_pretty(&output).unwrap());
        0
    }
}

fn load_check(status: &serde_json::Value) -> (&'static str, String) {
    let metric = |name: &str| {
        status
            .get("metrics")
            .and_then(|m| m.get(name))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    };
    let cpu = metric("cpu");
    let memory = metric("memory");
    let emergency = status
        .get("emergency_mode")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if emergency {
        let minutes = status
            .get("emergency_mode_duration_ms")
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            / 60_000;
        (
            "warn",
            format!("EMERGENCY MODE active for {minutes} min (cpu {cpu:.0}%, memory {memory:.0}%)"),
        )
    } else if cpu.max(memory) >= 75.0 {
        ("warn", format!("high load (cpu {cpu:.0}%, memory {memory:.0}%)"))
    } else {
        ("ok", format!("cpu {cpu:.0}%, memory {memory:.0}%"))
    }
}

#[cfg(test)]
mod tests {
    use super::load_check;
    use serde_json::json;

    #[test]
    fn emergency_mode_is_reported_with_duration() {
        let (status, detail) = load_check(&json!({
            "metrics": { "cpu": 95.0, "memory": 40.0 },
            "emergency_mode": true,
            "emergency_mode_duration_ms": 300000
        }));
        assert_eq!(status, "warn");
        assert!(detail.contains("EMERGENCY MODE active for 5 min"));
    }

    #[test]
    fn high_load_warns_without_emergency() {
        let (status, _) = load_check(&json!({
            "metrics": { "cpu": 20.0, "memory": 80.0 },
            "emergency_mode": false
        }));
        assert_eq!(status, "warn");
    }

    #[test]
    fn normal_load_is_ok() {
        let (status, detail) = load_check(&json!({
            "metrics": { "cpu": 12.4, "memory": 30.0 },
            "emergency_mode": false
        }));
        assert_eq!(status, "ok");
        assert_eq!(detail, "cpu 12%, memory 30%");
    }
}
