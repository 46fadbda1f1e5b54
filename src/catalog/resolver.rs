//! Per-vehicle sensor binding resolution.
//!
//! A frame resolves its PIDs against one prefetched `BindingSet` for the
//! vehicle. Sets are cached per vehicle with a short TTL, since bindings
//! change only through admin edits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::conversion::Conversion;
use crate::formula::EvaluationError;
use crate::logging::structured::LogContext;
use crate::storage::{SensorBinding, StoreError, TelemetryStore};

pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(60);

/// A binding with its conversion compiled.
#[derive(Debug, Clone)]
pub struct ResolvedBinding {
    pub binding: SensorBinding,
    pub conversion: Conversion,
}

impl ResolvedBinding {
    pub fn new(binding: SensorBinding) -> Self {
        let conversion = Conversion::for_sensor(&binding.sensor);
        Self {
            binding,
            conversion,
        }
    }

    pub fn process(&self, raw: f64) -> Result<f64, EvaluationError> {
        self.conversion.apply(raw, self.binding.sensor.data_bytes)
    }

    /// True when `value` falls outside the sensor's declared range.
    pub fn out_of_bounds(&self, value: f64) -> bool {
        let sensor = &self.binding.sensor;
        sensor.min_value.is_some_and(|min| value < min)
            || sensor.max_value.is_some_and(|max| value > max)
    }
}

/// All bindings of one vehicle, addressable by frame key.
#[derive(Debug, Default)]
pub struct BindingSet {
    vehicle_id: i64,
    bindings: Vec<ResolvedBinding>,
    by_key: HashMap<String, usize>,
}

impl BindingSet {
    /// Index bindings by mapping key first, then by sensor PID where the
    /// PID is not already claimed by a mapping key.
    pub fn new(vehicle_id: i64, bindings: Vec<SensorBinding>) -> Self {
        let bindings: Vec<ResolvedBinding> =
            bindings.into_iter().map(ResolvedBinding::new).collect();

        let mut by_key = HashMap::with_capacity(bindings.len() * 2);
        for (idx, resolved) in bindings.iter().enumerate() {
            if let Some(key) = resolved.binding.mapping_key.as_deref() {
                if !key.is_empty() {
                    by_key.entry(key.to_string()).or_insert(idx);
                }
            }
        }
        for (idx, resolved) in bindings.iter().enumerate() {
            by_key
                .entry(resolved.binding.sensor.pid.clone())
                .or_insert(idx);
        }

        Self {
            vehicle_id,
            bindings,
            by_key,
        }
    }

    pub fn vehicle_id(&self) -> i64 {
        self.vehicle_id
    }

    pub fn resolve(&self, key: &str) -> Option<&ResolvedBinding> {
        self.by_key.get(key).map(|&idx| &self.bindings[idx])
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedBinding> {
        self.bindings.iter()
    }
}

struct CachedSet {
    set: Arc<BindingSet>,
    loaded_at: Instant,
}

impl CachedSet {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() <= ttl
    }
}

/// Shared catalog of binding sets keyed by vehicle id.
pub struct SensorCatalog {
    ttl: Duration,
    sets: RwLock<HashMap<i64, CachedSet>>,
}

impl SensorCatalog {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sets: RwLock::new(HashMap::new()),
        }
    }

    /// Binding set for a vehicle: one store query on a miss or stale entry.
    pub fn bindings_for(
        &self,
        store: &dyn TelemetryStore,
        vehicle_id: i64,
        ctx: &LogContext,
    ) -> Result<Arc<BindingSet>, StoreError> {
        if let Some(cached) = self.sets.read().get(&vehicle_id) {
            if cached.is_fresh(self.ttl) {
                return Ok(Arc::clone(&cached.set));
            }
        }

        let started = Instant::now();
        let set = Arc::new(BindingSet::new(vehicle_id, store.vehicle_bindings(vehicle_id)?));
        log::debug!(
            "{} CATALOG_LOADED vehicle_id={} bindings={} elapsed_ms={}",
            ctx,
            vehicle_id,
            set.len(),
            started.elapsed().as_millis()
        );

        for resolved in set.iter() {
            if let Conversion::Invalid { formula, error } = &resolved.conversion {
                log::warn!(
                    "{} CATALOG_BAD_FORMULA pid={} formula={:?} error={}",
                    ctx,
                    resolved.binding.sensor.pid,
                    formula,
                    error
                );
            }
        }

        self.sets.write().insert(
            vehicle_id,
            CachedSet {
                set: Arc::clone(&set),
                loaded_at: Instant::now(),
            },
        );
        Ok(set)
    }

    /// Resolve a single frame key. Prefer `bindings_for` when resolving many.
    pub fn resolve(
        &self,
        store: &dyn TelemetryStore,
        vehicle_id: i64,
        key: &str,
        ctx: &LogContext,
    ) -> Result<Option<ResolvedBinding>, StoreError> {
        let set = self.bindings_for(store, vehicle_id, ctx)?;
        Ok(set.resolve(key).cloned())
    }

    /// Drop a vehicle's cached set so the next frame reloads it.
    pub fn invalidate(&self, vehicle_id: i64) {
        self.sets.write().remove(&vehicle_id);
    }

    pub fn cached_vehicles(&self) -> usize {
        self.sets.read().len()
    }

    /// Drop sets older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut sets = self.sets.write();
        let before = sets.len();
        sets.retain(|_, cached| cached.is_fresh(self.ttl));
        before - sets.len()
    }
}

impl Default for SensorCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_CATALOG_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewSensor, SqliteStore};

    fn store_with_vehicle() -> (SqliteStore, i64) {
        let store = SqliteStore::new_in_memory().unwrap();
        let device = store.provision_device("DEV1", 1).unwrap();
        let vehicle = store.provision_vehicle(device, "VIN1", &[]).unwrap();
        let rpm = store
            .upsert_sensor(
                &NewSensor::new("0x0C", "Engine RPM", "RPM")
                    .with_formula("((A * 256) + B) / 4", 2)
                    .with_bounds(0.0, 16383.75),
            )
            .unwrap();
        let speed = store
            .upsert_sensor(&NewSensor::new("0x0D", "Vehicle Speed", "km/h"))
            .unwrap();
        store.bind_sensor(vehicle, rpm, Some("rpm")).unwrap();
        store.bind_sensor(vehicle, speed, None).unwrap();
        (store, vehicle)
    }

    #[test]
    fn test_resolve_by_mapping_key_and_pid() {
        let (store, vehicle) = store_with_vehicle();
        let catalog = SensorCatalog::default();
        let ctx = LogContext::new("t");

        let set = catalog.bindings_for(&store, vehicle, &ctx).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.resolve("rpm").unwrap().binding.sensor.pid, "0x0C");
        assert_eq!(set.resolve("0x0C").unwrap().binding.sensor.pid, "0x0C");
        assert_eq!(set.resolve("0x0D").unwrap().binding.sensor.unit, "km/h");
        assert!(set.resolve("0xFF").is_none());

        let single = catalog.resolve(&store, vehicle, "rpm", &ctx).unwrap().unwrap();
        assert_eq!(single.process(1800.0), Ok(450.0));
    }

    #[test]
    fn test_cached_until_invalidated() {
        let (store, vehicle) = store_with_vehicle();
        let catalog = SensorCatalog::new(Duration::from_secs(600));
        let ctx = LogContext::new("t");

        let first = catalog.bindings_for(&store, vehicle, &ctx).unwrap();
        let coolant = store
            .upsert_sensor(&NewSensor::new("0x05", "Coolant", "°C").with_formula("A - 40", 1))
            .unwrap();
        store.bind_sensor(vehicle, coolant, None).unwrap();

        let second = catalog.bindings_for(&store, vehicle, &ctx).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.resolve("0x05").is_none());

        catalog.invalidate(vehicle);
        let third = catalog.bindings_for(&store, vehicle, &ctx).unwrap();
        assert_eq!(third.len(), 3);
        assert_eq!(third.resolve("0x05").unwrap().process(100.0), Ok(60.0));
        assert_eq!(catalog.cached_vehicles(), 1);
    }

    #[test]
    fn test_zero_ttl_always_reloads() {
        let (store, vehicle) = store_with_vehicle();
        let catalog = SensorCatalog::new(Duration::ZERO);
        let ctx = LogContext::new("t");
        let first = catalog.bindings_for(&store, vehicle, &ctx).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let second = catalog.bindings_for(&store, vehicle, &ctx).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_purge_expired_sets() {
        let (store, vehicle) = store_with_vehicle();
        let ctx = LogContext::new("t");

        let long_lived = SensorCatalog::new(Duration::from_secs(600));
        long_lived.bindings_for(&store, vehicle, &ctx).unwrap();
        assert_eq!(long_lived.purge_expired(), 0);
        assert_eq!(long_lived.cached_vehicles(), 1);

        let short_lived = SensorCatalog::new(Duration::ZERO);
        short_lived.bindings_for(&store, vehicle, &ctx).unwrap();
        short_lived.bindings_for(&store, 4242, &ctx).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(short_lived.purge_expired(), 2);
        assert_eq!(short_lived.cached_vehicles(), 0);
    }

    #[test]
    fn test_bounds() {
        let (store, vehicle) = store_with_vehicle();
        let set = SensorCatalog::default()
            .bindings_for(&store, vehicle, &LogContext::new("t"))
            .unwrap();
        let rpm = set.resolve("rpm").unwrap();
        assert!(!rpm.out_of_bounds(800.0));
        assert!(rpm.out_of_bounds(20000.0));
        assert!(rpm.out_of_bounds(-1.0));
        // no declared bounds
        assert!(!set.resolve("0x0D").unwrap().out_of_bounds(9999.0));
    }

    #[test]
    fn test_unknown_vehicle_is_empty_set() {
        let (store, _) = store_with_vehicle();
        let set = SensorCatalog::default()
            .bindings_for(&store, 4242, &LogContext::new("t"))
            .unwrap();
        assert!(set.is_empty());
        assert_eq!(set.vehicle_id(), 4242);
    }
}
