//! ApisixGlobalRule lifecycle
//!
//! Validates that plugins listed on an ApisixGlobalRule show up as a gateway
//! global rule, follow updates, and disappear with the resource.

use super::super::framework::assertions::*;
use super::super::framework::fixtures::{self, id_of};
use super::super::framework::{TestContext, TestResult};
use super::super::{TestConfig, TestScenario};
use common::derive_id;
use control::sync::status::{ErrorKind, RuleState};
use serde_json::json;

pub struct GlobalRuleScenario;

#[async_trait::async_trait]
impl TestScenario for GlobalRuleScenario {
    fn name(&self) -> &str {
        "global_rule"
    }

    async fn run(&self, ctx: &mut TestContext) -> TestResult {
        println!("\n🧪 Running ApisixGlobalRule Scenarios");
        ctx.reset().await?;

        test_enable_plugin(ctx).await?;
        test_redelivery_is_noop(ctx).await?;
        test_update_plugins(ctx).await?;
        test_disable_plugin(ctx).await?;
        test_v2beta3_plugin_map(ctx).await?;
        test_delete(ctx).await?;
        test_rejected_resource(ctx).await?;

        println!("✅ All ApisixGlobalRule tests passed!\n");
        Ok(())
    }

    fn should_skip(&self, config: &TestConfig) -> bool {
        !config.scenarios.global_rule
    }
}

async fn test_enable_plugin(ctx: &TestContext) -> TestResult {
    println!("  📝 Test 1: enabled plugin becomes a global rule");
    let id = id_of(fixtures::AGR_ECHO);
    assert_eq!(id, derive_id("default", "test-agr-1"));

    ctx.create(fixtures::AGR_ECHO)?;
    ctx.converge().await?;

    assert_rule(ctx, &id, json!({"echo": {"body": "hello, world!!"}}))?;
    assert_state(ctx, &id, &RuleState::Converged)?;
    assert_no_errors(ctx)?;
    assert_report_matches_gateway(ctx)?;
    println!("    ✅ echo applied under {}", id);
    Ok(())
}

async fn test_redelivery_is_noop(ctx: &TestContext) -> TestResult {
    println!("  📝 Test 2: redelivered event writes nothing");
    ctx.gateway.clear_calls();

    ctx.update(fixtures::AGR_ECHO)?;
    ctx.update(fixtures::AGR_ECHO)?;
    ctx.converge().await?;

    let writes = ctx.gateway.write_count();
    if writes != 0 {
        return Err(format!("expected no admin writes, saw {}", writes).into());
    }
    println!("    ✅ no admin writes");
    Ok(())
}

async fn test_update_plugins(ctx: &TestContext) -> TestResult {
    println!("  📝 Test 3: updated plugin list replaces the rule");
    let id = id_of(fixtures::AGR_ECHO_UPDATED);

    ctx.update(fixtures::AGR_ECHO_UPDATED)?;
    ctx.converge().await?;

    assert_rule(ctx, &id, json!({"cors": {}, "echo": {"body": "bye"}}))?;
    assert_state(ctx, &id, &RuleState::Converged)?;
    println!("    ✅ rule updated");
    Ok(())
}

async fn test_disable_plugin(ctx: &TestContext) -> TestResult {
    println!("  📝 Test 4: disabling every plugin leaves an empty rule");
    let id = id_of(fixtures::AGR_ECHO_DISABLED);

    ctx.update(fixtures::AGR_ECHO_DISABLED)?;
    ctx.converge().await?;

    assert_rule(ctx, &id, json!({}))?;
    assert_state(ctx, &id, &RuleState::Converged)?;
    println!("    ✅ rule kept with no plugins");
    Ok(())
}

async fn test_v2beta3_plugin_map(ctx: &TestContext) -> TestResult {
    println!("  📝 Test 5: v2beta3 plugin map");
    let id = id_of(fixtures::AGR_V2BETA3);
    assert_eq!(id, derive_id("apps", "legacy-agr"));

    ctx.create(fixtures::AGR_V2BETA3)?;
    ctx.converge().await?;

    assert_rule(
        ctx,
        &id,
        json!({"limit-count": {"count": 100, "time_window": 60}}),
    )?;
    assert_report_matches_gateway(ctx)?;
    println!("    ✅ disabled ip-restriction omitted");
    Ok(())
}

async fn test_delete(ctx: &TestContext) -> TestResult {
    println!("  📝 Test 6: deleting the resource removes the rule");
    let id = id_of(fixtures::AGR_ECHO);

    ctx.delete(fixtures::AGR_ECHO)?;
    ctx.converge().await?;

    assert_no_rule(ctx, &id)?;
    assert_state(ctx, &id, &RuleState::Absent)?;
    assert_rule(
        ctx,
        &id_of(fixtures::AGR_V2BETA3),
        json!({"limit-count": {"count": 100, "time_window": 60}}),
    )?;
    println!("    ✅ only the deleted resource's rule is gone");
    Ok(())
}

async fn test_rejected_resource(ctx: &TestContext) -> TestResult {
    println!("  📝 Test 7: invalid resource is reported, not applied");
    let id = id_of(fixtures::AGR_DUPLICATE);

    if ctx.create(fixtures::AGR_DUPLICATE).is_ok() {
        return Err("duplicate plugin was accepted".into());
    }
    ctx.converge().await?;

    assert_no_rule(ctx, &id)?;
    assert_error(ctx, &id, ErrorKind::Translation)?;

    ctx.delete(fixtures::AGR_DUPLICATE)?;
    ctx.converge().await?;
    assert_no_errors(ctx)?;
    println!("    ✅ translation error recorded and cleared on delete");
    Ok(())
}
