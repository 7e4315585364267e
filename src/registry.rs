use thiserror::Error;

/// The network is deployed with exactly two nodes.
pub const MAX_SOURCES: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThermostatRecord {
    pub short_addr: u16,
    pub temperature: i32,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("registry full ({capacity} sources), dropping update from {short_addr:#06x}")]
pub struct RegistryFull {
    pub short_addr: u16,
    pub capacity: usize,
}

/// What an accepted `upsert` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

/// Bounded short address → temperature table.
///
/// Records keep their insertion order. No two records share an address and the
/// table never grows past its capacity; a full table rejects new addresses
/// instead of evicting.
#[derive(Clone, Debug)]
pub struct TelemetryRegistry {
    records: Vec<ThermostatRecord>,
    capacity: usize,
}

impl Default for TelemetryRegistry {
    fn default() -> Self {
        Self::with_capacity(MAX_SOURCES)
    }
}

impl TelemetryRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn upsert(&mut self, short_addr: u16, temperature: i32) -> Result<Upsert, RegistryFull> {
        if let Some(record) = self.records.iter_mut().find(|r| r.short_addr == short_addr) {
            record.temperature = temperature;
            return Ok(Upsert::Updated);
        }

        if self.records.len() >= self.capacity {
            return Err(RegistryFull { short_addr, capacity: self.capacity });
        }

        self.records.push(ThermostatRecord { short_addr, temperature });
        Ok(Upsert::Created)
    }

    /// Average temperature of all known sources, `0` when there are none.
    ///
    /// Two sources are averaged with an arithmetic shift, which rounds toward
    /// negative infinity: `(-3 + -2) >> 1 == -3`.
    pub fn average(&self) -> i32 {
        match self.records.as_slice() {
            [] => 0,
            [only] => only.temperature,
            [a, b] => ((a.temperature as i64 + b.temperature as i64) >> 1) as i32,
            more => {
                let sum: i64 = more.iter().map(|r| r.temperature as i64).sum();
                sum.div_euclid(more.len() as i64) as i32
            }
        }
    }

    pub fn get(&self, short_addr: u16) -> Option<i32> {
        self.records
            .iter()
            .find(|r| r.short_addr == short_addr)
            .map(|r| r.temperature)
    }

    pub fn records(&self) -> &[ThermostatRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_of(temps: &[i32]) -> TelemetryRegistry {
        let mut registry = TelemetryRegistry::default();
        for (addr, temp) in temps.iter().enumerate() {
            registry.upsert(addr as u16, *temp).expect("upsert");
        }
        registry
    }

    #[test]
    fn average_rounds_toward_negative_infinity() {
        assert_eq!(registry_of(&[]).average(), 0);
        assert_eq!(registry_of(&[5]).average(), 5);
        assert_eq!(registry_of(&[10, 20]).average(), 15);
        assert_eq!(registry_of(&[11, 12]).average(), 11);
        assert_eq!(registry_of(&[-3, -2]).average(), -3);
        assert_eq!(registry_of(&[-1, 0]).average(), -1);
    }

    #[test]
    fn average_of_extremes_does_not_overflow() {
        assert_eq!(registry_of(&[i32::MAX, 1]).average(), i32::MAX / 2 + 1);
        assert_eq!(registry_of(&[i32::MIN, -1]).average(), i32::MIN / 2 - 1);
        assert_eq!(registry_of(&[i32::MAX, i32::MAX]).average(), i32::MAX);
        assert_eq!(registry_of(&[i32::MIN, i32::MIN]).average(), i32::MIN);

        let mut wide = TelemetryRegistry::with_capacity(3);
        for (addr, temp) in [i32::MAX, i32::MAX, i32::MAX].into_iter().enumerate() {
            wide.upsert(addr as u16, temp).unwrap();
        }
        assert_eq!(wide.average(), i32::MAX);
    }

    #[test]
    fn upsert_updates_in_place() {
        let mut registry = TelemetryRegistry::default();

        assert_eq!(registry.upsert(0xa, 12), Ok(Upsert::Created));
        assert_eq!(registry.upsert(0xa, 30), Ok(Upsert::Updated));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(0xa), Some(30));
    }

    #[test]
    fn third_source_is_rejected() {
        let mut registry = TelemetryRegistry::default();
        registry.upsert(0xa, 12).unwrap();
        registry.upsert(0xb, 14).unwrap();

        assert_eq!(
            registry.upsert(0xc, 40),
            Err(RegistryFull { short_addr: 0xc, capacity: 2 })
        );

        assert_eq!(
            registry.records(),
            &[
                ThermostatRecord { short_addr: 0xa, temperature: 12 },
                ThermostatRecord { short_addr: 0xb, temperature: 14 },
            ]
        );

        // known sources still update while full
        assert_eq!(registry.upsert(0xb, 15), Ok(Upsert::Updated));
        assert_eq!(registry.average(), 13);
    }

    #[test]
    fn iteration_order_is_insertion_order() {
        let mut registry = TelemetryRegistry::default();
        registry.upsert(0x20, 1).unwrap();
        registry.upsert(0x10, 2).unwrap();
        registry.upsert(0x20, 3).unwrap();

        let addrs: Vec<u16> = registry.records().iter().map(|r| r.short_addr).collect();
        assert_eq!(addrs, vec![0x20, 0x10]);
    }

    #[test]
    fn reset_empties() {
        let mut registry = registry_of(&[1, 2]);
        registry.reset();

        assert!(registry.is_empty());
        assert_eq!(registry.average(), 0);
        assert_eq!(registry.upsert(0x1, 9), Ok(Upsert::Created));
    }

    #[test]
    fn single_slot_registry() {
        let mut registry = TelemetryRegistry::with_capacity(1);
        registry.upsert(1, 5).unwrap();

        assert!(registry.upsert(2, 6).is_err());
        assert_eq!(registry.capacity(), 1);
        assert_eq!(registry.average(), 5);
    }
}
