//! Demo scenarios. Each drives page calls through the full pipeline and
//! prints the outcome and the audit entries it produced.

use std::time::Duration;

use serde_json::json;

use jade_contracts::{
    capability::Capability,
    error::{JadeError, JadeResult},
    origin::Origin,
    policy::Policy,
};
use jade_interceptor::host::{FetchRequest, StorageArea};

use crate::pipeline::{Pipeline, Tab};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn outcome<T, E: std::fmt::Display>(label: &str, result: Result<T, E>) {
    match result {
        Ok(_) => println!("  {:<44} ALLOWED", label),
        Err(e) => println!("  {:<44} BLOCKED  ({})", label, e),
    }
}

fn flag(label: &str, allowed: bool) {
    println!("  {:<44} {}", label, if allowed { "ALLOWED" } else { "BLOCKED" });
}

async fn print_audit(pipeline: &Pipeline, limit: usize) -> JadeResult<()> {
    println!();
    println!("  Audit (newest first):");
    for event in pipeline.recent(limit).await? {
        let r = &event.record;
        println!(
            "    [{:<8}] {:<16} {:<14} {}",
            r.action.to_string(),
            r.origin.as_str(),
            r.capability,
            r.reason.as_deref().unwrap_or("-"),
        );
        if let Some(msg) = &r.user_message {
            println!("               user message: {}", msg);
        }
    }
    println!();
    Ok(())
}

/// Wait for a pushed policy update to reach the tab's mediator.
async fn await_update(tab: &Tab, cond: impl Fn(&Policy) -> bool) -> JadeResult<()> {
    for _ in 0..200 {
        if tab.mediator.policy().is_some_and(|p| cond(&p)) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Err(JadeError::Timeout {
        request_id: "policy-update".to_string(),
        after_ms: 1000,
    })
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

pub async fn default_deny(pipeline: &Pipeline) -> JadeResult<()> {
    println!("=== Default deny: example.com, no stored policy ===");
    println!();
    let tab = pipeline.open("https://example.com/").await?;

    let result = tab
        .apis()
        .fetch(FetchRequest::get("https://api.example.com/data"))
        .await;
    outcome("fetch https://api.example.com/data", result);

    print_audit(pipeline, 1).await?;
    Ok(())
}

pub async fn preset(pipeline: &Pipeline) -> JadeResult<()> {
    println!("=== Preset: localhost (DOM + storage, risk 10) ===");
    println!();
    let tab = pipeline.open("http://localhost:3000/").await?;
    let apis = tab.apis();

    flag(
        "localStorage.setItem(\"theme\")",
        apis.set_item(StorageArea::Local, "theme", "dark").await,
    );
    let value = apis.get_item(StorageArea::Local, "theme").await;
    println!("  {:<44} {:?}", "localStorage.getItem(\"theme\")", value);
    outcome(
        "fetch http://localhost:3000/api",
        apis.fetch(FetchRequest::get("http://localhost:3000/api")).await,
    );
    println!(
        "  {:<44} {}",
        "content security policy",
        tab.mediator.content_security_policy().unwrap_or("(none)")
    );

    print_audit(pipeline, 3).await?;
    Ok(())
}

pub async fn save_then_allow(pipeline: &Pipeline) -> JadeResult<()> {
    println!("=== Save then allow: example.com gains allowNetwork ===");
    println!();
    let tab = pipeline.open("https://example.com/").await?;
    let apis = tab.apis();

    outcome(
        "fetch (before save)",
        apis.fetch(FetchRequest::get("https://example.com/feed")).await,
    );

    pipeline
        .store
        .save_policy(
            &Origin::new("example.com"),
            Policy::restrictive().allowing(Capability::Network),
        )
        .await?;
    await_update(&tab, |p| p.allows(Capability::Network)).await?;
    println!("  policy saved; mediator cache updated by push");

    outcome(
        "fetch (after save)",
        apis.fetch(FetchRequest::get("https://example.com/feed")).await,
    );

    print_audit(pipeline, 2).await?;
    Ok(())
}

pub async fn unknown_api(pipeline: &Pipeline) -> JadeResult<()> {
    println!("=== Unknown API: smellovision ===");
    println!();
    let tab = pipeline.open("https://example.com/").await?;
    let interceptor = tab.page.interceptor().ok_or_else(|| JadeError::ConfigError {
        reason: "interceptor not installed".to_string(),
    })?;

    let permission = interceptor
        .gate()
        .check("smellovision", json!({ "intensity": 11 }))
        .await;
    flag("smellovision", permission.allowed);

    print_audit(pipeline, 1).await?;
    Ok(())
}

pub async fn whitelist(pipeline: &Pipeline) -> JadeResult<()> {
    println!("=== Whitelist: github.com ===");
    println!();
    let tab = pipeline.open("https://www.github.com/").await?;
    let apis = tab.apis();

    outcome("clipboard.writeText (preset)", apis.write_clipboard("token").await);

    pipeline.store.whitelist(&Origin::new("github.com")).await?;
    await_update(&tab, |p| p.whitelisted).await?;
    println!("  origin whitelisted");

    outcome("clipboard.writeText (whitelisted)", apis.write_clipboard("token").await);
    outcome(
        "getUserMedia (whitelisted)",
        apis.get_user_media(json!({ "video": true })).await,
    );
    if !tab.host.alerts().is_empty() {
        println!("  alerts shown: {:?}", tab.host.alerts());
    }

    print_audit(pipeline, 3).await?;
    Ok(())
}

pub async fn timeout(pipeline: &Pipeline) -> JadeResult<()> {
    let deadline = pipeline.config.interceptor.decision_timeout_ms;
    println!("=== Timeout: mediator never answers ({}ms deadline) ===", deadline);
    println!();
    let tab = pipeline.open_stalled("https://example.com/").await?;

    outcome(
        "fetch https://example.com/slow",
        tab.apis().fetch(FetchRequest::get("https://example.com/slow")).await,
    );
    // The timeout report is fire-and-forget; give it a moment to land.
    tokio::time::sleep(Duration::from_millis(50)).await;

    print_audit(pipeline, 1).await?;
    Ok(())
}

pub async fn policies(pipeline: &Pipeline) -> JadeResult<()> {
    println!("=== Policies and risk scores ===");
    println!();

    // Persist the effective policies so they show up in the listing.
    for origin in ["example.com", "localhost", "google.com"] {
        let origin = Origin::new(origin);
        let current = pipeline.store.get_policy(&origin).await?;
        pipeline.store.save_policy(&origin, current).await?;
    }
    let tab = pipeline.open("http://localhost/").await?;
    let apis = tab.apis();
    apis.set_item(StorageArea::Local, "a", "1").await;
    apis.fetch(FetchRequest::get("http://localhost/x")).await.ok();
    apis.set_cookie("id=1").await;

    println!("  {:<16} {:>4}  granted", "origin", "risk");
    for summary in pipeline.store.list_policies().await? {
        let granted: Vec<&str> = summary
            .policy
            .capabilities
            .granted()
            .map(Capability::flag_name)
            .collect();
        println!(
            "  {:<16} {:>4}  {}{}",
            summary.origin.as_str(),
            summary.risk_score,
            granted.join(", "),
            if summary.policy.whitelisted { " (whitelisted)" } else { "" },
        );
    }
    println!();
    Ok(())
}
