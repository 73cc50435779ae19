use prometheus::{opts, IntGaugeVec, Registry};

#[derive(Debug, Clone)]
pub struct Metrics {
    pub pool_capacity: IntGaugeVec,
    pub pool_in_use: IntGaugeVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let pool_capacity = IntGaugeVec::new(
            opts!(
                "address_pool_size",
                "The number of addresses in the address pool"
            ),
            &["pool"],
        )
        .unwrap();
        let pool_in_use = IntGaugeVec::new(
            opts!(
                "address_pool_addresses_in_use",
                "The number of addresses currently allocated from the address pool"
            ),
            &["pool"],
        )
        .unwrap();

        Metrics {
            pool_capacity,
            pool_in_use,
        }
    }
}

impl Metrics {
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.pool_capacity.clone()))?;
        registry.register(Box::new(self.pool_in_use.clone()))?;
        Ok(self)
    }

    pub fn pool_capacity_set(&self, pool: &str, val: i64) {
        self.pool_capacity.with_label_values(&[pool]).set(val)
    }

    pub fn pool_in_use_set(&self, pool: &str, val: i64) {
        self.pool_in_use.with_label_values(&[pool]).set(val)
    }

    /// Drops every labeled series, ahead of republishing a new pool set.
    pub fn reset(&self) {
        self.pool_capacity.reset();
        self.pool_in_use.reset();
    }
}
