use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use shopdesk_core::config::SessionConfig;
use shopdesk_core::domain::EntityKind;
use shopdesk_core::plan::{Plan, PlanId, PlanStatus};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exchange {
    pub input: String,
    pub response: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
struct PendingPlan {
    plan: Plan,
    created_at: DateTime<Utc>,
}

/// Per-session conversational state. Only the flow handling this session mutates it.
#[derive(Debug)]
pub struct SessionContext {
    id: String,
    history: VecDeque<Exchange>,
    history_capacity: usize,
    remembered: BTreeMap<EntityKind, String>,
    pending: Option<PendingPlan>,
    finished: VecDeque<(PlanId, PlanStatus)>,
    finished_capacity: usize,
}

impl SessionContext {
    pub fn new(id: impl Into<String>, settings: &SessionConfig) -> Self {
        Self {
            id: id.into(),
            history: VecDeque::with_capacity(settings.history_capacity),
            history_capacity: settings.history_capacity.max(1),
            remembered: BTreeMap::new(),
            pending: None,
            finished: VecDeque::new(),
            finished_capacity: settings.remembered_plans.max(1),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Appends to history, evicting the oldest exchange when full.
    pub fn record_exchange(&mut self, input: impl Into<String>, response: impl Into<String>) {
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(Exchange {
            input: input.into(),
            response: response.into(),
            at: Utc::now(),
        });
    }

    pub fn history(&self) -> impl Iterator<Item = &Exchange> {
        self.history.iter()
    }

    pub fn remember_entity(&mut self, kind: EntityKind, id: impl Into<String>) {
        let id = id.into();
        debug!(event_name = "agent.session.remembered", session_id = %self.id, kind = %kind, id = %id);
        self.remembered.insert(kind, id);
    }

    pub fn remembered(&self, kind: EntityKind) -> Option<&str> {
        self.remembered.get(&kind).map(String::as_str)
    }

    /// Stores `plan` as the one pending plan and hands back whatever it replaced.
    pub fn set_pending_plan(&mut self, plan: Plan, now: DateTime<Utc>) -> Option<Plan> {
        self.pending.replace(PendingPlan { plan, created_at: now }).map(|previous| previous.plan)
    }

    pub fn clear_pending_plan(&mut self) -> Option<Plan> {
        self.pending.take().map(|pending| pending.plan)
    }

    pub fn pending_plan(&self) -> Option<&Plan> {
        self.pending.as_ref().map(|pending| &pending.plan)
    }

    /// Drops the pending plan when it has waited longer than `ttl`.
    pub fn expire_pending(&mut self, now: DateTime<Utc>, ttl: Duration) -> Option<Plan> {
        let expired = self.pending.as_ref().is_some_and(|pending| now - pending.created_at > ttl);
        if expired {
            return self.clear_pending_plan();
        }
        None
    }

    pub fn record_finished(&mut self, id: PlanId, status: PlanStatus) {
        if self.finished.len() == self.finished_capacity {
            self.finished.pop_front();
        }
        self.finished.push_back((id, status));
    }

    pub fn finished_status(&self, id: &str) -> Option<PlanStatus> {
        self.finished.iter().rev().find(|(plan_id, _)| plan_id.0 == id).map(|(_, status)| *status)
    }
}

pub type SharedSession = Arc<Mutex<SessionContext>>;

/// Live sessions keyed by id. Contexts never outlive the process.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SharedSession>>,
    settings: SessionConfig,
}

impl SessionStore {
    pub fn new(settings: SessionConfig) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), settings }
    }

    /// Returns the session called `requested`, creating it if needed. Without a
    /// requested id a fresh `sess_…` id is generated.
    pub async fn open(&self, requested: Option<&str>) -> (String, SharedSession) {
        let id = requested
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("sess_{}", Uuid::new_v4().simple()));

        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(event_name = "agent.session.opened", session_id = %id);
                Arc::new(Mutex::new(SessionContext::new(id.clone(), &self.settings)))
            })
            .clone();
        (id, session)
    }

    pub async fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.lock().await.get(id).cloned()
    }

    pub async fn close(&self, id: &str) -> bool {
        let removed = self.sessions.lock().await.remove(id).is_some();
        if removed {
            debug!(event_name = "agent.session.closed", session_id = %id);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
