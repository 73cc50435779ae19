use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

use crate::crd::{ServiceGroup, DEFAULT_POOL_NAME};
use crate::error::Error;
use crate::ledger::{Port, SharingLedger};
use crate::metrics::Metrics;
use crate::pool::Pool;
use crate::range::AddressFamily;
use crate::service;

/// How the pool of an allocation was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSource {
    Auto,
    Specified,
}

/// A service's current address binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub addr: IpAddr,
    pub pool: String,
    pub ports: Vec<Port>,
    pub sharing_key: String,
    pub source: PoolSource,
}

/// A prior allocation left behind by pool reconfiguration: its pool is gone
/// or no longer contains the address. Reported, never freed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedAllocation {
    pub service: String,
    pub addr: IpAddr,
    pub pool: String,
}

/// The address allocator. One logical owner; every public operation takes
/// the inner lock for its whole duration.
#[derive(Debug)]
pub struct Allocator {
    inner: Arc<Mutex<AllocatorInner>>,
}

impl Allocator {
    pub fn new() -> Allocator {
        Allocator {
            inner: Arc::new(Mutex::new(AllocatorInner::new())),
        }
    }

    pub fn metrics(&self) -> Result<Metrics, Error> {
        let inner = self.inner.lock().map_err(|_| Error::FailedToGetLock)?;
        Ok(inner.metrics.clone())
    }

    /// Replaces the pool configuration. Rejects the whole set on any invalid
    /// spec; reports allocations orphaned by the new configuration.
    pub fn set_pools(&self, groups: &[ServiceGroup]) -> Result<Vec<OrphanedAllocation>, Error> {
        let mut inner = self.inner.lock().map_err(|_| Error::FailedToGetLock)?;
        inner.rebind_pools(groups)
    }

    /// Allocates for a routine service event: an explicit address if the
    /// service demands one, a named pool if it asks for one, otherwise the
    /// first pool that can serve it.
    pub fn allocate_any_ip(&self, svc: &Service) -> Result<(String, IpAddr), Error> {
        let mut inner = self.inner.lock().map_err(|_| Error::FailedToGetLock)?;
        inner.assign_any(svc)
    }

    /// Allocates the specific address the caller demands. Returns the pool
    /// that holds it.
    pub fn allocate_specific_ip(&self, svc: &Service, addr: IpAddr) -> Result<String, Error> {
        let mut inner = self.inner.lock().map_err(|_| Error::FailedToGetLock)?;
        inner.assign_specific(svc, addr, PoolSource::Specified)
    }

    /// Allocates the lowest free or share-compatible address of the named
    /// pool.
    pub fn allocate_from_pool(&self, svc: &Service, pool: &str) -> Result<IpAddr, Error> {
        let mut inner = self.inner.lock().map_err(|_| Error::FailedToGetLock)?;
        inner.assign_from_pool(svc, pool, PoolSource::Specified)
    }

    /// Registers an allocation already observed on the orchestrator, warming
    /// the allocator at startup. Idempotent; the observed state is
    /// authoritative, so only containment and family are checked.
    pub fn notify_existing(&self, svc: &Service, addr: IpAddr) -> Result<(), Error> {
        let mut inner = self.inner.lock().map_err(|_| Error::FailedToGetLock)?;
        inner.notify(svc, addr)
    }

    /// Removes the service's allocation. Removing an absent entry is a no-op.
    pub fn unassign(&self, svc_id: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock().map_err(|_| Error::FailedToGetLock)?;
        inner.remove(svc_id);
        Ok(())
    }

    pub fn assigned_ip(&self, svc_id: &str) -> Option<IpAddr> {
        let inner = self.inner.lock().ok()?;
        inner.allocated.get(svc_id).map(|alloc| alloc.addr)
    }

    pub fn allocation(&self, svc_id: &str) -> Option<Allocation> {
        let inner = self.inner.lock().ok()?;
        inner.allocated.get(svc_id).cloned()
    }

    /// A snapshot of every current allocation, ordered by service identity.
    pub fn allocations(&self) -> Vec<(String, Allocation)> {
        let inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(_) => return Vec::new(),
        };
        let mut allocs = inner
            .allocated
            .iter()
            .map(|(svc, alloc)| (svc.clone(), alloc.clone()))
            .collect::<Vec<(String, Allocation)>>();
        allocs.sort_by(|a, b| a.0.cmp(&b.0));
        allocs
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Allocator::new()
    }
}

#[derive(Debug)]
struct AllocatorInner {
    pools: HashMap<String, Pool>,
    pool_order: Vec<String>,
    allocated: HashMap<String, Allocation>,
    ledger: SharingLedger,
    metrics: Metrics,
}

impl AllocatorInner {
    fn new() -> AllocatorInner {
        AllocatorInner {
            pools: HashMap::new(),
            pool_order: Vec::new(),
            allocated: HashMap::new(),
            ledger: SharingLedger::new(),
            metrics: Metrics::default(),
        }
    }

    fn pool_containing(&self, addr: &IpAddr) -> Option<&str> {
        self.pool_order
            .iter()
            .find(|name| {
                self.pools
                    .get(name.as_str())
                    .map(|p| p.contains(addr))
                    .unwrap_or(false)
            })
            .map(String::as_str)
    }

    fn check_family(svc: &Service, addr: &IpAddr) -> Result<(), Error> {
        if let Some(cluster) = service::cluster_addr(svc) {
            if AddressFamily::from(&cluster) != AddressFamily::from(addr) {
                return Err(Error::FamilyMismatch);
            }
        }
        Ok(())
    }

    fn assign_specific(
        &mut self,
        svc: &Service,
        addr: IpAddr,
        source: PoolSource,
    ) -> Result<String, Error> {
        let svc_id = service::namespaced_name(svc);
        let pool_name = self
            .pool_containing(&addr)
            .ok_or(Error::NotInAnyPool(addr))?
            .to_string();
        Self::check_family(svc, &addr)?;
        let ports = service::ports(svc);
        let sharing_key = service::sharing_key(svc);
        self.ledger.can_assign(&addr, &svc_id, &ports, &sharing_key)?;
        self.commit(
            svc_id,
            Allocation {
                addr,
                pool: pool_name.clone(),
                ports,
                sharing_key,
                source,
            },
        );
        Ok(pool_name)
    }

    fn assign_from_pool(
        &mut self,
        svc: &Service,
        pool_name: &str,
        source: PoolSource,
    ) -> Result<IpAddr, Error> {
        let svc_id = service::namespaced_name(svc);
        let pool = self
            .pools
            .get(pool_name)
            .ok_or_else(|| Error::NoSuchPool(pool_name.to_string()))?;
        let family = service::cluster_addr(svc).map(|a| AddressFamily::from(&a));
        let ports = service::ports(svc);
        let sharing_key = service::sharing_key(svc);
        let prior = self
            .allocated
            .get(&svc_id)
            .map(|alloc| (alloc.pool.clone(), alloc.addr));
        // A service renewing from the pool that already holds its address
        // keeps that address, so replayed events and in-place port or
        // sharing-key changes do not migrate it.
        let addr = match prior {
            Some((prev_pool, prev_addr))
                if prev_pool == pool_name
                    && pool.contains(&prev_addr)
                    && family.map_or(true, |f| f == AddressFamily::from(&prev_addr))
                    && self
                        .ledger
                        .can_assign(&prev_addr, &svc_id, &ports, &sharing_key)
                        .is_ok() =>
            {
                prev_addr
            }
            _ => pool.assign_next(&svc_id, &ports, &sharing_key, family, &self.ledger)?,
        };
        self.commit(
            svc_id,
            Allocation {
                addr,
                pool: pool_name.to_string(),
                ports,
                sharing_key,
                source,
            },
        );
        Ok(addr)
    }

    fn assign_any(&mut self, svc: &Service) -> Result<(String, IpAddr), Error> {
        if let Some(addr) = service::explicit_lb_addr(svc)? {
            if service::desired_pool(svc).is_some() {
                return Err(Error::DesiredPoolWithExplicitAddress);
            }
            let pool = self.assign_specific(svc, addr, PoolSource::Specified)?;
            return Ok((pool, addr));
        }

        if let Some(pool_name) = service::desired_pool(svc) {
            // A desired pool is an instruction, not a hint: exhaustion here
            // does not spill into other pools.
            let addr = self.assign_from_pool(svc, &pool_name, PoolSource::Specified)?;
            return Ok((pool_name, addr));
        }

        let svc_id = service::namespaced_name(svc);
        let mut candidates: Vec<String> = Vec::new();
        // Only the allocator's own record names a prior pool; the
        // allocated-pool annotation is output written for the caller and is
        // never read back.
        if let Some(alloc) = self.allocated.get(&svc_id) {
            candidates.push(alloc.pool.clone());
        }
        if !candidates.iter().any(|n| n == DEFAULT_POOL_NAME) {
            candidates.push(DEFAULT_POOL_NAME.to_string());
        }
        for name in &self.pool_order {
            if !candidates.contains(name) {
                candidates.push(name.clone());
            }
        }

        for name in candidates {
            if !self.pools.contains_key(&name) {
                continue;
            }
            match self.assign_from_pool(svc, &name, PoolSource::Auto) {
                Ok(addr) => return Ok((name, addr)),
                Err(e) => {
                    tracing::debug!(service = %svc_id, pool = %name, error = %e, "pool cannot serve the service");
                }
            }
        }
        Err(Error::Exhausted)
    }

    fn notify(&mut self, svc: &Service, addr: IpAddr) -> Result<(), Error> {
        let svc_id = service::namespaced_name(svc);
        let pool_name = self
            .pool_containing(&addr)
            .ok_or(Error::NotInAnyPool(addr))?
            .to_string();
        Self::check_family(svc, &addr)?;
        let source = if service::desired_pool(svc).is_some() {
            PoolSource::Specified
        } else {
            PoolSource::Auto
        };
        self.commit(
            svc_id,
            Allocation {
                addr,
                pool: pool_name,
                ports: service::ports(svc),
                sharing_key: service::sharing_key(svc),
                source,
            },
        );
        Ok(())
    }

    /// The single mutation path: the service map and the address ledger move
    /// together, releasing any previous address of the service first.
    fn commit(&mut self, svc_id: String, alloc: Allocation) {
        let prior = self
            .allocated
            .get(&svc_id)
            .map(|prev| (prev.addr, prev.pool.clone()));
        if let Some((prev_addr, _)) = &prior {
            if *prev_addr != alloc.addr {
                self.ledger.release(&svc_id);
            }
        }
        self.ledger.assign(
            alloc.addr,
            &svc_id,
            &alloc.ports,
            &alloc.sharing_key,
            &alloc.pool,
        );
        // The previous pool recounts after the ledger has moved: the entry
        // may have changed pools while keeping its address.
        if let Some((_, prev_pool)) = &prior {
            if *prev_pool != alloc.pool {
                self.refresh_in_use(prev_pool);
            }
        }
        self.refresh_in_use(&alloc.pool);
        tracing::info!(service = %svc_id, address = %alloc.addr, pool = %alloc.pool, "assign address");
        self.allocated.insert(svc_id, alloc);
    }

    fn remove(&mut self, svc_id: &str) {
        let alloc = match self.allocated.remove(svc_id) {
            Some(a) => a,
            None => return,
        };
        match self.ledger.release(svc_id) {
            Some((addr, pool)) => {
                tracing::info!(service = svc_id, address = %addr, pool = %pool, "release address");
            }
            None => {
                tracing::info!(service = svc_id, address = %alloc.addr, "leave shared address");
            }
        }
        self.refresh_in_use(&alloc.pool);
    }

    fn rebind_pools(&mut self, groups: &[ServiceGroup]) -> Result<Vec<OrphanedAllocation>, Error> {
        let mut new_pools: HashMap<String, Pool> = HashMap::new();
        let mut new_order: Vec<String> = Vec::new();
        for group in groups {
            let name = group.name_any();
            if new_pools.contains_key(&name) {
                return Err(Error::DuplicatePool(name));
            }
            let pool = Pool::try_from(&group.spec)?;
            new_pools.insert(name.clone(), pool);
            new_order.push(name);
        }

        let mut orphans = self
            .allocated
            .iter()
            .filter(|(_, alloc)| {
                !new_pools
                    .get(&alloc.pool)
                    .map(|p| p.contains(&alloc.addr))
                    .unwrap_or(false)
            })
            .map(|(svc, alloc)| OrphanedAllocation {
                service: svc.clone(),
                addr: alloc.addr,
                pool: alloc.pool.clone(),
            })
            .collect::<Vec<OrphanedAllocation>>();
        orphans.sort_by(|a, b| a.service.cmp(&b.service));

        self.pools = new_pools;
        self.pool_order = new_order;

        self.metrics.reset();
        for name in &self.pool_order {
            if let Some(pool) = self.pools.get(name) {
                let capacity = i64::try_from(pool.capacity()).unwrap_or(i64::MAX);
                self.metrics.pool_capacity_set(name, capacity);
            }
            self.refresh_in_use(name);
        }

        for orphan in &orphans {
            tracing::warn!(
                service = %orphan.service,
                address = %orphan.addr,
                pool = %orphan.pool,
                "allocation orphaned by pool reconfiguration"
            );
        }
        Ok(orphans)
    }

    fn pool_in_use(&self, name: &str) -> usize {
        match self.pools.get(name) {
            Some(pool) => self
                .ledger
                .entries()
                .filter(|(addr, entry)| entry.pool() == name && pool.contains(addr))
                .count(),
            None => 0,
        }
    }

    fn refresh_in_use(&self, name: &str) {
        if self.pools.contains_key(name) {
            self.metrics.pool_in_use_set(name, self.pool_in_use(name) as i64);
        }
    }
}
