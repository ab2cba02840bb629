//! Per-tenant monthly usage accounting and plan limits.
//!
//! Counters live in the [`KvStore`] under
//! `usage/{tenant}/{YYYY-MM}/{counter}` and are only ever changed through
//! [`KvStore::incr`], so concurrent increments never lose updates. The
//! month comes from an injectable [`Clock`]; a new month simply starts
//! from fresh keys.
//!
//! Two gating styles are offered:
//!
//! - [`UsageLedger::check_limit`] followed by [`UsageLedger::increment`],
//!   which is advisory (two concurrent callers may both pass the check).
//! - [`UsageLedger::try_consume`], which increments first and rolls back
//!   when the new value is over the limit. This never lets a counter stay
//!   above its limit.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RagError, Result};
use crate::kv::{parse_counter, plan_key, usage_key, KvStore};
use crate::models::TenantId;

/// The metered resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterType {
    /// Documents ingested this month (re-ingestion counts again).
    Documents,
    /// Questions answered this month.
    Queries,
    /// Bytes of extracted text ingested this month.
    StorageBytes,
}

impl CounterType {
    pub const ALL: [CounterType; 3] = [
        CounterType::Documents,
        CounterType::Queries,
        CounterType::StorageBytes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CounterType::Documents => "documents",
            CounterType::Queries => "queries",
            CounterType::StorageBytes => "storage_bytes",
        }
    }
}

impl fmt::Display for CounterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plan limit. Serialized as an integer where `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Limit {
    Unlimited,
    Max(u64),
}

impl Limit {
    /// Whether a counter currently at `current` may be consumed further.
    pub fn allows(&self, current: u64) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::Max(max) => current < *max,
        }
    }

    pub fn exceeded_by(&self, value: u64) -> bool {
        match self {
            Limit::Unlimited => false,
            Limit::Max(max) => value > *max,
        }
    }
}

impl TryFrom<i64> for Limit {
    type Error = String;

    fn try_from(v: i64) -> std::result::Result<Self, Self::Error> {
        match v {
            -1 => Ok(Limit::Unlimited),
            v if v >= 0 => Ok(Limit::Max(v as u64)),
            v => Err(format!("invalid limit {}: use -1 for unlimited", v)),
        }
    }
}

impl From<Limit> for i64 {
    fn from(limit: Limit) -> Self {
        match limit {
            Limit::Unlimited => -1,
            Limit::Max(v) => v as i64,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Unlimited => f.write_str("unlimited"),
            Limit::Max(v) => write!(f, "{}", v),
        }
    }
}

/// Limits for one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub documents: Limit,
    pub queries: Limit,
    pub storage_bytes: Limit,
}

impl PlanLimits {
    pub fn limit(&self, counter: CounterType) -> Limit {
        match counter {
            CounterType::Documents => self.documents,
            CounterType::Queries => self.queries,
            CounterType::StorageBytes => self.storage_bytes,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            documents: Limit::Unlimited,
            queries: Limit::Unlimited,
            storage_bytes: Limit::Unlimited,
        }
    }
}

const GIB: u64 = 1024 * 1024 * 1024;

/// Named plans plus the plan given to tenants without an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    default_plan: String,
    plans: BTreeMap<String, PlanLimits>,
}

impl PlanCatalog {
    pub fn new(default_plan: impl Into<String>, plans: BTreeMap<String, PlanLimits>) -> Result<Self> {
        let default_plan = default_plan.into();
        if !plans.contains_key(&default_plan) {
            return Err(RagError::invalid(format!(
                "default plan '{}' is not defined",
                default_plan
            )));
        }
        Ok(Self {
            default_plan,
            plans,
        })
    }

    /// `starter`, `pro` and `enterprise`, with `starter` as the default.
    pub fn builtin() -> Self {
        let mut plans = BTreeMap::new();
        plans.insert(
            "starter".to_string(),
            PlanLimits {
                documents: Limit::Max(5),
                queries: Limit::Max(5000),
                storage_bytes: Limit::Max(10 * GIB),
            },
        );
        plans.insert(
            "pro".to_string(),
            PlanLimits {
                documents: Limit::Max(20),
                queries: Limit::Max(20000),
                storage_bytes: Limit::Max(50 * GIB),
            },
        );
        plans.insert("enterprise".to_string(), PlanLimits::unlimited());
        Self {
            default_plan: "starter".to_string(),
            plans,
        }
    }

    pub fn default_plan(&self) -> &str {
        &self.default_plan
    }

    pub fn get(&self, name: &str) -> Result<&PlanLimits> {
        self.plans
            .get(name)
            .ok_or_else(|| RagError::invalid(format!("unknown plan '{}'", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plans.keys().map(String::as_str)
    }
}

/// Source of the current time, injectable for month-rollover tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// `YYYY-MM` of the current time.
    fn month(&self) -> String {
        self.now().format("%Y-%m").to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Mutex::new(at))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.0.lock() {
            *now = at;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.0.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Receipt for a successful [`UsageLedger::try_consume`], used to undo it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumption {
    pub counter: CounterType,
    pub month: String,
    pub amount: u64,
    /// Counter value after the consumption.
    pub value: u64,
}

/// One counter in a [`UsageSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterUsage {
    pub used: u64,
    pub limit: Limit,
}

/// Usage of one tenant in one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub tenant: TenantId,
    pub month: String,
    pub plan: String,
    pub documents: CounterUsage,
    pub queries: CounterUsage,
    pub storage_bytes: CounterUsage,
}

impl UsageSnapshot {
    pub fn counter(&self, counter: CounterType) -> CounterUsage {
        match counter {
            CounterType::Documents => self.documents,
            CounterType::Queries => self.queries,
            CounterType::StorageBytes => self.storage_bytes,
        }
    }
}

pub struct UsageLedger {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    catalog: PlanCatalog,
}

impl UsageLedger {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, catalog: PlanCatalog) -> Self {
        Self { kv, clock, catalog }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub fn current_month(&self) -> String {
        self.clock.month()
    }

    /// Plan assigned to `tenant`, or the catalog default.
    pub async fn plan_for(&self, tenant: &TenantId) -> Result<String> {
        let assigned = self.kv.get(&plan_key(tenant)).await?;
        match assigned {
            Some(name) if self.catalog.get(&name).is_ok() => Ok(name),
            Some(name) => {
                warn!(tenant = %tenant, plan = %name, "Assigned plan no longer exists, using default");
                Ok(self.catalog.default_plan().to_string())
            }
            None => Ok(self.catalog.default_plan().to_string()),
        }
    }

    pub async fn limits_for(&self, tenant: &TenantId) -> Result<PlanLimits> {
        let name = self.plan_for(tenant).await?;
        self.catalog.get(&name).copied()
    }

    pub async fn set_plan(&self, tenant: &TenantId, plan: &str) -> Result<()> {
        self.catalog.get(plan)?;
        self.kv.set(&plan_key(tenant), plan).await
    }

    /// Current value of a counter for this month.
    pub async fn current(&self, tenant: &TenantId, counter: CounterType) -> Result<u64> {
        self.read(tenant, &self.clock.month(), counter).await
    }

    async fn read(&self, tenant: &TenantId, month: &str, counter: CounterType) -> Result<u64> {
        let key = usage_key(tenant, month, counter.as_str());
        let value = self.kv.get(&key).await?;
        Ok(parse_counter(&key, value.as_deref())?.max(0) as u64)
    }

    /// Whether `counter` is still below its limit under `plan`.
    pub async fn check_limit(
        &self,
        tenant: &TenantId,
        plan: &PlanLimits,
        counter: CounterType,
    ) -> Result<bool> {
        let limit = plan.limit(counter);
        if limit == Limit::Unlimited {
            return Ok(true);
        }
        let current = self.current(tenant, counter).await?;
        Ok(limit.allows(current))
    }

    /// Add `amount` to this month's counter and return the new value.
    pub async fn increment(&self, tenant: &TenantId, counter: CounterType, amount: u64) -> Result<u64> {
        let month = self.clock.month();
        self.add(tenant, &month, counter, amount as i64).await
    }

    async fn add(&self, tenant: &TenantId, month: &str, counter: CounterType, delta: i64) -> Result<u64> {
        let key = usage_key(tenant, month, counter.as_str());
        let value = self.kv.incr(&key, delta).await?;
        Ok(value.max(0) as u64)
    }

    /// Increment, then roll back and fail with `QuotaExceeded` if the new
    /// value is over the plan limit.
    pub async fn try_consume(
        &self,
        tenant: &TenantId,
        plan: &PlanLimits,
        counter: CounterType,
        amount: u64,
    ) -> Result<Consumption> {
        let month = self.clock.month();
        let limit = plan.limit(counter);
        let value = self.add(tenant, &month, counter, amount as i64).await?;
        if limit.exceeded_by(value) {
            self.add(tenant, &month, counter, -(amount as i64)).await?;
            debug!(tenant = %tenant, counter = %counter, value, "Consumption rolled back");
            return Err(RagError::QuotaExceeded {
                tenant: tenant.to_string(),
                counter,
                limit: match limit {
                    Limit::Max(max) => max,
                    Limit::Unlimited => u64::MAX,
                },
            });
        }
        Ok(Consumption {
            counter,
            month,
            amount,
            value,
        })
    }

    /// Undo a consumption in the month it was recorded.
    pub async fn release(&self, tenant: &TenantId, consumption: &Consumption) -> Result<()> {
        self.add(
            tenant,
            &consumption.month,
            consumption.counter,
            -(consumption.amount as i64),
        )
        .await?;
        Ok(())
    }

    pub async fn snapshot(&self, tenant: &TenantId) -> Result<UsageSnapshot> {
        let month = self.clock.month();
        self.snapshot_for_month(tenant, &month).await
    }

    pub async fn snapshot_for_month(&self, tenant: &TenantId, month: &str) -> Result<UsageSnapshot> {
        let plan = self.plan_for(tenant).await?;
        let limits = *self.catalog.get(&plan)?;
        let mut usage = Vec::with_capacity(CounterType::ALL.len());
        for counter in CounterType::ALL {
            usage.push(CounterUsage {
                used: self.read(tenant, month, counter).await?,
                limit: limits.limit(counter),
            });
        }
        Ok(UsageSnapshot {
            tenant: tenant.clone(),
            month: month.to_string(),
            plan,
            documents: usage[0],
            queries: usage[1],
            storage_bytes: usage[2],
        })
    }
}
