//! StateStore: redb-backed persistence for policies and activities.
//!
//! Values are JSON-serialized into redb's `&[u8]` value columns. The store
//! runs against a file on disk or an in-memory redb backend, and implements
//! both [`PolicyBackend`] and [`ActivityBackend`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;
use uuid::Uuid;

use crate::activity::{event_timestamp, ScalingActivity, ScalingRequest, ScalingUpdate};
use crate::backend::{is_collectable, ActivityBackend, PolicyBackend};
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::Policy;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(POLICIES).map_err(map_err!(Table))?;
        txn.open_table(ACTIVITIES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_activity(&self, id: Uuid, activity: &ScalingActivity) -> StateResult<()> {
        let key = id.to_string();
        let value = serde_json::to_vec(activity).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ACTIVITIES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl PolicyBackend for StateStore {
    fn get_policies(&self) -> StateResult<HashMap<String, Policy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        let mut results = HashMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let policy: Policy =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.insert(key.value().to_string(), policy);
        }
        Ok(results)
    }

    fn get_policy(&self, class: &str) -> StateResult<Option<Policy>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
        match table.get(class).map_err(map_err!(Read))? {
            Some(guard) => {
                let policy: Policy =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(policy))
            }
            None => Ok(None),
        }
    }

    fn put_policy(&self, policy: &Policy) -> StateResult<()> {
        policy.validate()?;
        let value = serde_json::to_vec(policy).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            table
                .insert(policy.class.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(class = %policy.class, "policy stored");
        Ok(())
    }

    fn delete_policy(&self, class: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(POLICIES).map_err(map_err!(Table))?;
            existed = table.remove(class).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%class, existed, "policy deleted");
        Ok(())
    }
}

impl ActivityBackend for StateStore {
    fn write_request(&self, req: &ScalingRequest) -> StateResult<()> {
        self.put_activity(req.id, &ScalingActivity::started(req))
    }

    fn write_request_event(&self, update: &ScalingUpdate) -> StateResult<()> {
        // Read-modify-write inside one write transaction so concurrent
        // appends to the same activity cannot lose events.
        let key = update.id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ACTIVITIES).map_err(map_err!(Table))?;
            let mut activity: ScalingActivity = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(key)),
            };
            activity.apply(update);
            let value = serde_json::to_vec(&activity).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_activity(&self, id: Uuid) -> StateResult<Option<ScalingActivity>> {
        let key = id.to_string();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIVITIES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let activity: ScalingActivity =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(activity))
            }
            None => Ok(None),
        }
    }

    fn get_activities(&self) -> StateResult<HashMap<Uuid, ScalingActivity>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ACTIVITIES).map_err(map_err!(Table))?;
        let mut results = HashMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let id = Uuid::parse_str(key.value()).map_err(map_err!(Deserialize))?;
            let activity: ScalingActivity =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.insert(id, activity);
        }
        Ok(results)
    }

    fn run_garbage_collection(&self) -> StateResult<usize> {
        let now = event_timestamp();
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(ACTIVITIES).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let activity: ScalingActivity =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if is_collectable(&activity, now) {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ACTIVITIES).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(removed = keys.len(), "activity garbage collection finished");
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Event, SOURCE_CLUSTER, SOURCE_TIDEPOOL};
    use crate::backend::GARBAGE_COLLECTION_THRESHOLD;
    use crate::types::{
        ComparisonAction, ComparisonOperator, PolicyCheck, ProviderKind, ScaleDirection,
        ScaleResource, ScaleStatus, ASG_NAME_CONFIG_KEY,
    };

    fn test_policy(class: &str) -> Policy {
        let mut checks = HashMap::new();
        checks.insert(
            "mem-low".to_string(),
            PolicyCheck {
                enabled: true,
                resource: ScaleResource::Memory,
                comparison_operator: ComparisonOperator::LessThan,
                comparison_percentage: 20.0,
                action: ComparisonAction::ScaleIn,
            },
        );
        let mut provider_config = HashMap::new();
        provider_config.insert(ASG_NAME_CONFIG_KEY.to_string(), format!("{class}-asg"));
        Policy {
            class: class.to_string(),
            enabled: true,
            min_count: 2,
            max_count: 10,
            scale_in_count: 1,
            scale_out_count: 2,
            provider: ProviderKind::AwsAutoscaling,
            provider_config,
            checks,
        }
    }

    fn update(id: Uuid, status: ScaleStatus, message: &str, timestamp: i64) -> ScalingUpdate {
        ScalingUpdate {
            id,
            status,
            detail: Event {
                timestamp,
                message: message.to_string(),
                source: SOURCE_CLUSTER.to_string(),
            },
        }
    }

    // ── Policies ───────────────────────────────────────────────────

    #[test]
    fn policy_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let policy = test_policy("batch");

        store.put_policy(&policy).unwrap();
        assert_eq!(store.get_policy("batch").unwrap(), Some(policy));
        assert!(store.get_policy("web").unwrap().is_none());
    }

    #[test]
    fn policy_replaced_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        let mut policy = test_policy("batch");
        store.put_policy(&policy).unwrap();

        policy.max_count = 20;
        store.put_policy(&policy).unwrap();

        let all = store.get_policies().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["batch"].max_count, 20);
    }

    #[test]
    fn invalid_policy_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        let mut policy = test_policy("batch");
        policy.provider_config.clear();

        assert!(matches!(
            store.put_policy(&policy),
            Err(StateError::InvalidPolicy(_))
        ));
        assert!(store.get_policies().unwrap().is_empty());
    }

    #[test]
    fn policy_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_policy(&test_policy("batch")).unwrap();

        store.delete_policy("batch").unwrap();
        store.delete_policy("batch").unwrap();
        assert!(store.get_policy("batch").unwrap().is_none());
    }

    // ── Activities ─────────────────────────────────────────────────

    #[test]
    fn activity_lifecycle() {
        let store = StateStore::open_in_memory().unwrap();
        let req = ScalingRequest::new(test_policy("batch"), ScaleDirection::In);
        store.write_request(&req).unwrap();

        let started = store.get_activity(req.id).unwrap().unwrap();
        assert_eq!(started.status, ScaleStatus::Started);
        assert_eq!(started.provider, ProviderKind::AwsAutoscaling);
        assert_eq!(started.provider_config[ASG_NAME_CONFIG_KEY], "batch-asg");

        store
            .write_request_event(&update(req.id, ScaleStatus::InProgress, "draining", 5))
            .unwrap();
        store
            .write_request_event(&ScalingUpdate {
                id: req.id,
                status: ScaleStatus::Completed,
                detail: Event {
                    timestamp: 9,
                    message: "done".to_string(),
                    source: SOURCE_TIDEPOOL.to_string(),
                },
            })
            .unwrap();

        let activity = store.get_activity(req.id).unwrap().unwrap();
        let messages: Vec<_> = activity.events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["scaling activity has started", "draining", "done"]);
        assert_eq!(activity.status, ScaleStatus::Completed);
        assert_eq!(activity.last_update, 9);
        assert_eq!(store.get_activities().unwrap().len(), 1);
    }

    #[test]
    fn event_for_unknown_activity_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let result =
            store.write_request_event(&update(Uuid::new_v4(), ScaleStatus::InProgress, "x", 1));
        assert!(matches!(result, Err(StateError::NotFound(_))));
    }

    #[test]
    fn garbage_collection_keeps_recent_and_running() {
        let store = StateStore::open_in_memory().unwrap();
        let old = event_timestamp() - GARBAGE_COLLECTION_THRESHOLD.as_nanos() as i64 - 1;

        let finished = ScalingRequest::new(test_policy("a"), ScaleDirection::Out);
        let running = ScalingRequest::new(test_policy("b"), ScaleDirection::Out);
        store.write_request(&finished).unwrap();
        store.write_request(&running).unwrap();
        store
            .write_request_event(&update(finished.id, ScaleStatus::Failed, "boom", old))
            .unwrap();
        store
            .write_request_event(&update(running.id, ScaleStatus::InProgress, "wait", old))
            .unwrap();

        assert_eq!(store.run_garbage_collection().unwrap(), 1);
        assert!(store.get_activity(finished.id).unwrap().is_none());
        assert!(store.get_activity(running.id).unwrap().is_some());
        assert_eq!(store.run_garbage_collection().unwrap(), 0);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tidepool.redb");
        let req = ScalingRequest::new(test_policy("batch"), ScaleDirection::Out);

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_policy(&test_policy("batch")).unwrap();
            store.write_request(&req).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_policy("batch").unwrap().is_some());
        let activity = store.get_activity(req.id).unwrap().unwrap();
        assert_eq!(activity.direction, ScaleDirection::Out);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.get_policies().unwrap().is_empty());
        assert!(store.get_activities().unwrap().is_empty());
        assert!(store.get_activity(Uuid::new_v4()).unwrap().is_none());
        assert_eq!(store.run_garbage_collection().unwrap(), 0);
    }
}
