use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::info;

use crate::error::Result;
use crate::model::EmployeeProfile;
use crate::store::EmployeeDirectory;

/// TTL cache in front of another directory. Only hits are cached; a missing
/// employee is looked up again next time.
pub struct CachedDirectory {
    inner: Arc<dyn EmployeeDirectory>,
    cache: Cache<u64, EmployeeProfile>,
}

impl CachedDirectory {
    pub fn new(inner: Arc<dyn EmployeeDirectory>, ttl: Duration, max_capacity: u64) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Preload profiles, e.g. the employees with open requests at startup.
    pub async fn warmup(&self, employee_ids: &[u64]) -> Result<usize> {
        let mut loaded = Vec::with_capacity(employee_ids.len());
        for &employee_id in employee_ids {
            if let Some(profile) = self.inner.get_employee(employee_id).await? {
                loaded.push(profile);
            }
        }

        let count = loaded.len();
        let inserts: Vec<_> = loaded
            .into_iter()
            .map(|profile| self.cache.insert(profile.id, profile))
            .collect();
        futures::future::join_all(inserts).await;

        info!(count, requested = employee_ids.len(), "Employee cache warmup complete");
        Ok(count)
    }

    pub async fn invalidate(&self, employee_id: u64) {
        self.cache.invalidate(&employee_id).await;
    }
}

#[async_trait]
impl EmployeeDirectory for CachedDirectory {
    async fn get_employee(&self, employee_id: u64) -> Result<Option<EmployeeProfile>> {
        if let Some(profile) = self.cache.get(&employee_id).await {
            return Ok(Some(profile));
        }

        let profile = self.inner.get_employee(employee_id).await?;
        if let Some(profile) = &profile {
            self.cache.insert(employee_id, profile.clone()).await;
        }
        Ok(profile)
    }
}
