//! Fault tolerance
//!
//! Validates retries of transient admin failures, isolation of permanently
//! failing ids, restart without rewrites, orphan pruning and drift repair.

use super::super::framework::assertions::*;
use super::super::framework::fixtures::{self, id_of};
use super::super::framework::{TestContext, TestResult};
use super::super::{TestConfig, TestScenario};
use control::admin::{AdminCall, InMemoryGateway};
use control::error::AdminError;
use control::sync::status::{ErrorKind, RuleState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub struct FaultToleranceScenario;

#[async_trait::async_trait]
impl TestScenario for FaultToleranceScenario {
    fn name(&self) -> &str {
        "fault_tolerance"
    }

    async fn run(&self, ctx: &mut TestContext) -> TestResult {
        println!("\n🧪 Running Fault Tolerance Scenarios");

        test_startup_listing_retried(ctx).await?;
        test_transient_failures_retried(ctx).await?;
        test_permanent_failure_isolated(ctx).await?;
        test_one_write_in_flight_per_id(ctx).await?;
        test_restart_without_rewrites(ctx).await?;
        test_orphans_pruned(ctx).await?;
        test_drift_repaired(ctx).await?;

        println!("✅ All fault tolerance tests passed!\n");
        Ok(())
    }

    fn should_skip(&self, config: &TestConfig) -> bool {
        !config.scenarios.fault_tolerance
    }
}

async fn test_startup_listing_retried(ctx: &mut TestContext) -> TestResult {
    println!("  📝 Test 1: initial listing survives transient failures");
    let gateway = Arc::new(InMemoryGateway::new());
    gateway.fail_list(AdminError::Transient("connection refused".to_string()), 2);

    ctx.start_with(gateway).await?;

    let lists = ctx
        .gateway
        .calls()
        .iter()
        .filter(|call| **call == AdminCall::List)
        .count();
    if lists != 3 {
        return Err(format!("expected 3 list calls, saw {}", lists).into());
    }
    println!("    ✅ engine started after {} attempts", lists);
    Ok(())
}

async fn test_transient_failures_retried(ctx: &mut TestContext) -> TestResult {
    println!("  📝 Test 2: transient admin failures are retried");
    ctx.reset().await?;
    let id = id_of(fixtures::AGR_ECHO);
    ctx.gateway
        .fail_next(&id, AdminError::Transient("503 Service Unavailable".to_string()), 2);

    ctx.create(fixtures::AGR_ECHO)?;
    ctx.converge().await?;

    assert_rule(ctx, &id, json!({"echo": {"body": "hello, world!!"}}))?;
    assert_state(ctx, &id, &RuleState::Converged)?;
    assert_no_errors(ctx)?;

    let attempts = ctx.gateway.upsert_count(&id);
    if attempts != 3 {
        return Err(format!("expected 3 upsert attempts, saw {}", attempts).into());
    }
    println!("    ✅ converged after {} attempts", attempts);
    Ok(())
}

async fn test_permanent_failure_isolated(ctx: &mut TestContext) -> TestResult {
    println!("  📝 Test 3: a rejected id does not block the others");
    ctx.reset().await?;
    let bad = id_of(fixtures::AGR_V2BETA3);
    let good = id_of(fixtures::ACC_PROMETHEUS_V2BETA3);
    ctx.gateway.reject_always(
        &bad,
        AdminError::Permanent("400 unknown plugin limit-count".to_string()),
    );

    ctx.create(fixtures::AGR_V2BETA3)?;
    ctx.create(fixtures::ACC_PROMETHEUS_V2BETA3)?;
    ctx.converge().await?;

    assert_failed(ctx, &bad)?;
    assert_error(ctx, &bad, ErrorKind::Apply)?;
    assert_no_rule(ctx, &bad)?;
    if ctx.gateway.upsert_count(&bad) != 1 {
        return Err("permanent failure was retried".into());
    }

    assert_rule(ctx, &good, json!({"prometheus": {}}))?;
    assert_state(ctx, &good, &RuleState::Converged)?;

    // A newer generation re-arms the failed id
    ctx.gateway.accept(&bad);
    ctx.delete(fixtures::AGR_V2BETA3)?;
    ctx.create(fixtures::AGR_V2BETA3)?;
    ctx.converge().await?;
    assert_rule(
        ctx,
        &bad,
        json!({"limit-count": {"count": 100, "time_window": 60}}),
    )?;
    assert_state(ctx, &bad, &RuleState::Converged)?;
    assert_no_errors(ctx)?;
    println!("    ✅ failure isolated and recovered");
    Ok(())
}

async fn test_one_write_in_flight_per_id(ctx: &mut TestContext) -> TestResult {
    println!("  📝 Test 4: rapid updates never overlap for one id");
    ctx.reset().await?;
    let id = id_of(fixtures::AGR_ECHO);
    ctx.gateway.set_latency(&id, Duration::from_millis(50));

    ctx.create(fixtures::AGR_ECHO)?;
    ctx.update(fixtures::AGR_ECHO_UPDATED)?;
    ctx.update(fixtures::AGR_ECHO_DISABLED)?;
    ctx.update(fixtures::AGR_ECHO_UPDATED)?;
    ctx.converge().await?;

    let overlap = ctx.gateway.max_in_flight(&id);
    if overlap != 1 {
        return Err(format!("saw {} concurrent writes for {}", overlap, id).into());
    }
    assert_rule(ctx, &id, json!({"cors": {}, "echo": {"body": "bye"}}))?;
    assert_report_matches_gateway(ctx)?;
    println!("    ✅ latest update won, writes serialized");
    Ok(())
}

async fn test_restart_without_rewrites(ctx: &mut TestContext) -> TestResult {
    println!("  📝 Test 5: restart re-lists instead of rewriting");
    ctx.reset().await?;
    ctx.create(fixtures::AGR_ECHO)?;
    ctx.create(fixtures::ACC_FULL_V2)?;
    ctx.converge().await?;

    ctx.restart().await?;
    ctx.create(fixtures::AGR_ECHO)?;
    ctx.create(fixtures::ACC_FULL_V2)?;
    ctx.converge().await?;

    let writes = ctx.gateway.write_count();
    if writes != 0 {
        return Err(format!("expected no admin writes after restart, saw {}", writes).into());
    }
    assert_state(ctx, &id_of(fixtures::AGR_ECHO), &RuleState::Converged)?;
    assert_report_matches_gateway(ctx)?;
    println!("    ✅ applied cache seeded from the gateway");
    Ok(())
}

async fn test_orphans_pruned(ctx: &mut TestContext) -> TestResult {
    println!("  📝 Test 6: rules nobody owns are pruned");
    ctx.reset().await?;
    let mut orphan = common::PluginMap::new();
    orphan.insert("echo".to_string(), json!({"body": "stale"}));
    ctx.gateway.put_external("orphan-rule", orphan);

    ctx.restart().await?;
    ctx.create(fixtures::AGR_ECHO)?;
    ctx.converge().await?;

    let pruned = ctx.engine.prune_unowned().await?;
    if pruned != 1 {
        return Err(format!("expected 1 pruned rule, got {}", pruned).into());
    }
    ctx.converge().await?;

    assert_no_rule(ctx, "orphan-rule")?;
    assert_rule(
        ctx,
        &id_of(fixtures::AGR_ECHO),
        json!({"echo": {"body": "hello, world!!"}}),
    )?;
    println!("    ✅ orphan deleted, owned rule kept");
    Ok(())
}

async fn test_drift_repaired(ctx: &mut TestContext) -> TestResult {
    println!("  📝 Test 7: out-of-band changes are repaired by resync");
    ctx.reset().await?;
    let echo = id_of(fixtures::AGR_ECHO);
    let monitoring = id_of(fixtures::ACC_PROMETHEUS_V2BETA3);
    ctx.create(fixtures::AGR_ECHO)?;
    ctx.create(fixtures::ACC_PROMETHEUS_V2BETA3)?;
    ctx.converge().await?;

    ctx.gateway.remove_external(&echo);
    let mut tampered = common::PluginMap::new();
    tampered.insert("prometheus".to_string(), json!({"prefer_name": true}));
    ctx.gateway.put_external(&monitoring, tampered);

    let repaired = ctx.engine.resync().await?;
    if repaired != 2 {
        return Err(format!("expected 2 repairs, got {}", repaired).into());
    }
    ctx.converge().await?;

    assert_rule(ctx, &echo, json!({"echo": {"body": "hello, world!!"}}))?;
    assert_rule(ctx, &monitoring, json!({"prometheus": {}}))?;
    assert_report_matches_gateway(ctx)?;

    let repaired = ctx.engine.resync().await?;
    if repaired != 0 {
        return Err(format!("expected a clean resync, got {} repairs", repaired).into());
    }
    println!("    ✅ drift repaired");
    Ok(())
}
