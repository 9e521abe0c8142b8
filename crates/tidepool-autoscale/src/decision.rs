//! Policy decision engine.
//!
//! Pure evaluation of a policy's checks against class utilisation.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use tidepool_resource::AllocatedStats;
use tidepool_state::{
    ComparisonAction, ComparisonOperator, PolicyCheck, ScaleDirection, ScaleResource,
};

/// Evaluate every enabled check and fold the results into one direction.
///
/// Scale-out wins when checks disagree; `None` means no action.
pub fn evaluate(
    checks: &HashMap<String, PolicyCheck>,
    stats: &AllocatedStats,
) -> Option<ScaleDirection> {
    let mut directions = HashSet::new();

    for (name, check) in checks {
        if !check.enabled {
            debug!(check = %name, "scaling policy check administratively disabled");
            continue;
        }

        let actual = match check.resource {
            ScaleResource::Cpu => stats.cpu,
            ScaleResource::Memory => stats.memory,
        };

        debug!(
            check = %name,
            resource = %check.resource,
            threshold = check.comparison_percentage,
            actual,
            comparison = %check.comparison_operator,
            "performing scaling policy check"
        );

        let direction = match check.comparison_operator {
            ComparisonOperator::GreaterThan => {
                check_greater_than(actual, check.comparison_percentage, check.action)
            }
            ComparisonOperator::LessThan => {
                check_less_than(actual, check.comparison_percentage, check.action)
            }
        };
        directions.extend(direction);
    }

    if directions.contains(&ScaleDirection::Out) {
        Some(ScaleDirection::Out)
    } else if directions.contains(&ScaleDirection::In) {
        Some(ScaleDirection::In)
    } else {
        None
    }
}

/// `action` when `actual` is strictly above `threshold`.
pub fn check_greater_than(
    actual: f64,
    threshold: f64,
    action: ComparisonAction,
) -> Option<ScaleDirection> {
    (actual > threshold).then(|| action.direction())
}

/// `action` when `actual` is strictly below `threshold`.
pub fn check_less_than(
    actual: f64,
    threshold: f64,
    action: ComparisonAction,
) -> Option<ScaleDirection> {
    (actual < threshold).then(|| action.direction())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(
        resource: ScaleResource,
        operator: ComparisonOperator,
        threshold: f64,
        action: ComparisonAction,
    ) -> PolicyCheck {
        PolicyCheck {
            enabled: true,
            resource,
            comparison_operator: operator,
            comparison_percentage: threshold,
            action,
        }
    }

    #[test]
    fn greater_than_is_strict() {
        assert_eq!(check_greater_than(90.0, 91.0, ComparisonAction::ScaleOut), None);
        assert_eq!(check_greater_than(91.0, 91.0, ComparisonAction::ScaleOut), None);
        assert_eq!(
            check_greater_than(90.001, 90.0, ComparisonAction::ScaleOut),
            Some(ScaleDirection::Out)
        );
    }

    #[test]
    fn less_than_is_strict() {
        assert_eq!(
            check_less_than(111001.01, 111001.1, ComparisonAction::ScaleIn),
            Some(ScaleDirection::In)
        );
        assert_eq!(check_less_than(20.0, 20.0, ComparisonAction::ScaleIn), None);
    }

    #[test]
    fn scale_out_wins_over_scale_in() {
        let mut checks = HashMap::new();
        checks.insert(
            "cpu-high".to_string(),
            check(ScaleResource::Cpu, ComparisonOperator::GreaterThan, 80.0, ComparisonAction::ScaleOut),
        );
        checks.insert(
            "mem-low".to_string(),
            check(ScaleResource::Memory, ComparisonOperator::LessThan, 30.0, ComparisonAction::ScaleIn),
        );

        let stats = AllocatedStats { cpu: 90.0, memory: 10.0 };
        assert_eq!(evaluate(&checks, &stats), Some(ScaleDirection::Out));
    }

    #[test]
    fn single_scale_in() {
        let mut checks = HashMap::new();
        checks.insert(
            "mem-low".to_string(),
            check(ScaleResource::Memory, ComparisonOperator::LessThan, 30.0, ComparisonAction::ScaleIn),
        );

        let stats = AllocatedStats { cpu: 90.0, memory: 10.0 };
        assert_eq!(evaluate(&checks, &stats), Some(ScaleDirection::In));
    }

    #[test]
    fn disabled_checks_are_skipped() {
        let mut c = check(ScaleResource::Cpu, ComparisonOperator::GreaterThan, 10.0, ComparisonAction::ScaleOut);
        c.enabled = false;
        let checks = HashMap::from([("cpu-high".to_string(), c)]);

        let stats = AllocatedStats { cpu: 90.0, memory: 90.0 };
        assert_eq!(evaluate(&checks, &stats), None);
    }

    #[test]
    fn no_checks_means_no_action() {
        let stats = AllocatedStats { cpu: 100.0, memory: 100.0 };
        assert_eq!(evaluate(&HashMap::new(), &stats), None);
    }
}
