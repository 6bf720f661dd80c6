//! ApisixClusterConfig monitoring
//!
//! Validates that monitoring settings of the cluster-scoped config become
//! the prometheus / skywalking global plugins, in both schema versions.

use super::super::framework::assertions::*;
use super::super::framework::fixtures::{self, id_of};
use super::super::framework::{TestContext, TestResult};
use super::super::{TestConfig, TestScenario};
use common::derive_id;
use control::sync::status::{ErrorKind, RuleState};
use serde_json::json;

pub struct ClusterConfigScenario;

#[async_trait::async_trait]
impl TestScenario for ClusterConfigScenario {
    fn name(&self) -> &str {
        "cluster_config"
    }

    async fn run(&self, ctx: &mut TestContext) -> TestResult {
        println!("\n🧪 Running ApisixClusterConfig Scenarios");
        ctx.reset().await?;

        test_v2beta3_prometheus(ctx).await?;
        test_v2_full_monitoring(ctx).await?;
        test_rejected_update_keeps_rule(ctx).await?;
        test_delete(ctx).await?;

        println!("✅ All ApisixClusterConfig tests passed!\n");
        Ok(())
    }

    fn should_skip(&self, config: &TestConfig) -> bool {
        !config.scenarios.cluster_config
    }
}

async fn test_v2beta3_prometheus(ctx: &TestContext) -> TestResult {
    println!("  📝 Test 1: v2beta3 prometheus");
    let id = id_of(fixtures::ACC_PROMETHEUS_V2BETA3);
    assert_eq!(id, derive_id("", "default"));

    ctx.create(fixtures::ACC_PROMETHEUS_V2BETA3)?;
    ctx.converge().await?;

    assert_rule(ctx, &id, json!({"prometheus": {}}))?;
    assert_state(ctx, &id, &RuleState::Converged)?;
    println!("    ✅ prometheus enabled");
    Ok(())
}

async fn test_v2_full_monitoring(ctx: &TestContext) -> TestResult {
    println!("  📝 Test 2: v2 prometheus + skywalking");
    let id = id_of(fixtures::ACC_FULL_V2);

    ctx.update(fixtures::ACC_FULL_V2)?;
    ctx.converge().await?;

    assert_rule(
        ctx,
        &id,
        json!({
            "prometheus": {"prefer_name": true},
            "skywalking": {"sample_ratio": 0.5}
        }),
    )?;
    assert_no_errors(ctx)?;
    println!("    ✅ both monitoring plugins applied");
    Ok(())
}

async fn test_rejected_update_keeps_rule(ctx: &TestContext) -> TestResult {
    println!("  📝 Test 3: rejected update leaves the applied rule alone");
    let id = id_of(fixtures::ACC_BAD_SAMPLE_RATIO);

    if ctx.update(fixtures::ACC_BAD_SAMPLE_RATIO).is_ok() {
        return Err("out of range sample ratio was accepted".into());
    }
    ctx.converge().await?;

    assert_error(ctx, &id, ErrorKind::Translation)?;
    assert_rule(
        ctx,
        &id,
        json!({
            "prometheus": {"prefer_name": true},
            "skywalking": {"sample_ratio": 0.5}
        }),
    )?;

    // Fixing the resource clears the error even though nothing changes
    ctx.update(fixtures::ACC_FULL_V2)?;
    ctx.converge().await?;
    assert_no_errors(ctx)?;
    assert_state(ctx, &id, &RuleState::Converged)?;
    println!("    ✅ previous rule kept, error cleared after fix");
    Ok(())
}

async fn test_delete(ctx: &TestContext) -> TestResult {
    println!("  📝 Test 4: deleting the config removes the rule");
    let id = id_of(fixtures::ACC_FULL_V2);

    ctx.delete(fixtures::ACC_FULL_V2)?;
    ctx.converge().await?;

    assert_no_rule(ctx, &id)?;
    assert_report_matches_gateway(ctx)?;
    println!("    ✅ rule removed");
    Ok(())
}
