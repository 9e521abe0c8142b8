//! Full scaling cycles through a running control plane.

use std::collections::HashMap;
use std::time::Duration;

use tidepool_resource::{
    AllocationResources, AllocationSnapshot, AllocationStatus, NodeResources, NodeSnapshot,
    NodeStatus, SchedulingEligibility,
};
use tidepool_scale::event::MESSAGE_SUCCESS;
use tidepool_scale::provider::noop::NOTIFY_MESSAGE;
use tidepool_state::{
    ActivityBackend, ComparisonAction, ComparisonOperator, Policy, PolicyCheck, ProviderKind, ScaleDirection,
    ScaleResource, ScaleStatus, ScalingActivity, START_MESSAGE,
};
use tidepoold::config::ServerConfig;
use tidepoold::feed::TopologyEvent;
use tidepoold::ControlPlane;

fn node(id: &str) -> TopologyEvent {
    TopologyEvent::Node(NodeSnapshot {
        id: id.to_string(),
        node_class: "batch".to_string(),
        status: NodeStatus::Ready,
        scheduling_eligibility: SchedulingEligibility::Eligible,
        node_resources: Some(NodeResources { cpu_shares: 1000, memory_mb: 1000 }),
        reserved_resources: Some(NodeResources::default()),
        resources: None,
        reserved: None,
        attributes: HashMap::new(),
    })
}

fn allocation(id: &str, node_id: &str, cpu: u64) -> TopologyEvent {
    TopologyEvent::Allocation(AllocationSnapshot {
        id: id.to_string(),
        node_id: node_id.to_string(),
        client_status: AllocationStatus::Running,
        resources: AllocationResources { cpu, memory_mb: 100 },
    })
}

fn policy(min_count: u32, check: PolicyCheck) -> Policy {
    Policy {
        class: "batch".to_string(),
        enabled: true,
        min_count,
        max_count: 4,
        scale_in_count: 1,
        scale_out_count: 1,
        provider: ProviderKind::NoOp,
        provider_config: HashMap::new(),
        checks: HashMap::from([("check".to_string(), check)]),
    }
}

/// Config with a timer slow enough that only manual passes run.
fn config(policy: Policy) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.autoscaler.interval_secs = 3600;
    config.policies.push(policy);
    config
}

async fn wait_for_class_nodes(plane: &ControlPlane, count: usize) {
    for _ in 0..200 {
        if plane.tracker().nodes_of_class("batch").await.len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("tracker never saw {count} nodes");
}

async fn wait_for_terminal_activity(plane: &ControlPlane) -> Vec<ScalingActivity> {
    for _ in 0..200 {
        let activities = plane.activities().get_activities().unwrap();
        if !activities.is_empty() && activities.values().all(|a| a.status.is_terminal()) {
            return activities.into_values().collect();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("activity never reached a terminal status");
}

fn messages(activity: &ScalingActivity) -> Vec<&str> {
    activity.events.iter().map(|e| e.message.as_str()).collect()
}

#[tokio::test]
async fn scale_out_cycle_with_noop_provider() {
    let check = PolicyCheck {
        enabled: true,
        resource: ScaleResource::Cpu,
        comparison_operator: ComparisonOperator::GreaterThan,
        comparison_percentage: 10.0,
        action: ComparisonAction::ScaleOut,
    };
    let plane = ControlPlane::start(&config(policy(2, check)), None).unwrap();

    let topology = plane.topology();
    topology.apply(node("n1")).await.unwrap();
    topology.apply(node("n2")).await.unwrap();
    wait_for_class_nodes(&plane, 2).await;
    topology.apply(allocation("a1", "n1", 800)).await.unwrap();
    for _ in 0..200 {
        let stats = plane.tracker().class_resource_allocation("batch").await.unwrap();
        if stats.cpu > 10.0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let autoscaler = plane.autoscaler().unwrap();
    assert!(autoscaler.run_evaluation().await);

    let activities = wait_for_terminal_activity(&plane).await;
    assert_eq!(activities.len(), 1);
    let activity = &activities[0];
    assert_eq!(activity.direction, ScaleDirection::Out);
    assert_eq!(activity.status, ScaleStatus::Completed);
    assert_eq!(
        messages(activity),
        vec![START_MESSAGE, NOTIFY_MESSAGE, MESSAGE_SUCCESS]
    );

    plane.shutdown().await;
}

#[tokio::test]
async fn scale_in_cycle_with_noop_provider() {
    let check = PolicyCheck {
        enabled: true,
        resource: ScaleResource::Memory,
        comparison_operator: ComparisonOperator::LessThan,
        comparison_percentage: 50.0,
        action: ComparisonAction::ScaleIn,
    };
    let plane = ControlPlane::start(&config(policy(1, check)), None).unwrap();

    let topology = plane.topology();
    topology.apply(node("n1")).await.unwrap();
    topology.apply(node("n2")).await.unwrap();
    wait_for_class_nodes(&plane, 2).await;

    assert!(plane.autoscaler().unwrap().run_evaluation().await);

    let activities = wait_for_terminal_activity(&plane).await;
    assert_eq!(activities.len(), 1);
    let activity = &activities[0];
    assert_eq!(activity.direction, ScaleDirection::In);
    assert_eq!(activity.status, ScaleStatus::Completed);
    assert_eq!(
        messages(activity),
        vec![START_MESSAGE, NOTIFY_MESSAGE, MESSAGE_SUCCESS]
    );

    plane.shutdown().await;
}

#[tokio::test]
async fn breached_bounds_create_no_activity() {
    let check = PolicyCheck {
        enabled: true,
        resource: ScaleResource::Memory,
        comparison_operator: ComparisonOperator::LessThan,
        comparison_percentage: 50.0,
        action: ComparisonAction::ScaleIn,
    };
    // Two nodes with a minimum of two: scaling in would breach it.
    let plane = ControlPlane::start(&config(policy(2, check)), None).unwrap();

    let topology = plane.topology();
    topology.apply(node("n1")).await.unwrap();
    topology.apply(node("n2")).await.unwrap();
    wait_for_class_nodes(&plane, 2).await;

    assert!(plane.autoscaler().unwrap().run_evaluation().await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(plane.activities().get_activities().unwrap().is_empty());
    plane.shutdown().await;
}
