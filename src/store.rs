//! Concurrent table of the latest reading per (arm, k, dtype).
//!
//! One lock guards readings, slave counts and the period bookkeeping. Snapshot
//! accessors copy out while holding the lock and release it before returning,
//! so protocol servers never hold it while encoding a response.

use crate::{protocol, Error};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

pub type Arm = u8;
pub type RowSelector = u8;
pub type DataType = u8;

/// `k -> dtype -> value`
pub type ArmSnapshot = BTreeMap<RowSelector, BTreeMap<DataType, f64>>;
/// `arm -> k -> dtype -> value`
pub type AllSnapshot = BTreeMap<Arm, ArmSnapshot>;

pub const ARM_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    pub value: f64,
    pub updated_at: DateTime<Utc>,
}

/// Marks a sampling sweep started by an arm-row frame. Not read by any
/// protocol adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeriodState {
    pub active: bool,
    pub period_start: Option<DateTime<Utc>>,
}

/// Full copy of the store contents at one instant.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub readings: BTreeMap<Arm, BTreeMap<RowSelector, BTreeMap<DataType, Reading>>>,
    pub slave_counts: [u8; ARM_COUNT],
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn get(&self, arm: Arm, k: RowSelector, dtype: DataType) -> Option<Reading> {
        self.readings.get(&arm)?.get(&k)?.get(&dtype).copied()
    }

    pub fn slave_count(&self, arm: Arm) -> u8 {
        slave_index(arm).map_or(0, |i| self.slave_counts[i])
    }

    /// Number of (arm, k) rows that belong to a battery.
    pub fn battery_row_count(&self) -> usize {
        self.readings
            .values()
            .map(|rows| rows.keys().filter(|&&k| k > protocol::ARM_ROW).count())
            .sum()
    }

    pub fn arm_count(&self) -> usize {
        self.readings.len()
    }

    pub fn entry_count(&self) -> usize {
        self.readings
            .values()
            .flat_map(|rows| rows.values())
            .map(BTreeMap::len)
            .sum()
    }
}

#[derive(Debug, Default)]
struct Inner {
    readings: BTreeMap<Arm, BTreeMap<RowSelector, BTreeMap<DataType, Reading>>>,
    slave_counts: [u8; ARM_COUNT],
    period: PeriodState,
    last_k: Option<RowSelector>,
}

#[derive(Debug, Default)]
pub struct TelemetryStore {
    inner: Mutex<Inner>,
}

fn slave_index(arm: Arm) -> Option<usize> {
    protocol::ARMS
        .contains(&arm)
        .then(|| usize::from(arm - 1))
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts a reading stamped with the current time.
    ///
    /// The stamp is taken under the lock, so the stored timestamps of one key
    /// follow the order in which writes were applied.
    pub fn put(&self, arm: Arm, k: RowSelector, dtype: DataType, value: f64) {
        let mut inner = self.inner.lock();
        let reading = Reading {
            value,
            updated_at: Utc::now(),
        };
        inner
            .readings
            .entry(arm)
            .or_default()
            .entry(k)
            .or_default()
            .insert(dtype, reading);
        drop(inner);
        log::debug!("put arm={arm} k={k} dtype={dtype} value={value}");
    }

    pub fn get(&self, arm: Arm, k: RowSelector, dtype: DataType) -> Option<f64> {
        self.get_reading(arm, k, dtype).map(|r| r.value)
    }

    /// Value and timestamp, read together under the lock.
    pub fn get_reading(&self, arm: Arm, k: RowSelector, dtype: DataType) -> Option<Reading> {
        let inner = self.inner.lock();
        inner.readings.get(&arm)?.get(&k)?.get(&dtype).copied()
    }

    pub fn get_arm(&self, arm: Arm) -> ArmSnapshot {
        let inner = self.inner.lock();
        inner
            .readings
            .get(&arm)
            .map(values_of_arm)
            .unwrap_or_default()
    }

    pub fn get_all(&self) -> AllSnapshot {
        let inner = self.inner.lock();
        inner
            .readings
            .iter()
            .map(|(&arm, rows)| (arm, values_of_arm(rows)))
            .collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock();
        Snapshot {
            readings: inner.readings.clone(),
            slave_counts: inner.slave_counts,
            taken_at: Utc::now(),
        }
    }

    /// Drops every reading. Slave counts and period state are kept.
    pub fn clear(&self) {
        self.inner.lock().readings.clear();
        log::info!("telemetry store cleared");
    }

    pub fn set_arm_slave_count(&self, arm: Arm, count: u8) -> Result<(), Error> {
        let index = slave_index(arm).ok_or(Error::InvalidArm(arm))?;
        self.inner.lock().slave_counts[index] = count;
        Ok(())
    }

    /// Replaces the counts of all four arms in one step.
    pub fn set_arm_slave_counts(&self, counts: [u8; ARM_COUNT]) {
        self.inner.lock().slave_counts = counts;
        log::info!("arm slave counts: {counts:?}");
    }

    pub fn get_arm_slave_count(&self, arm: Arm) -> u8 {
        slave_index(arm).map_or(0, |i| self.inner.lock().slave_counts[i])
    }

    pub fn arm_slave_counts(&self) -> [u8; ARM_COUNT] {
        self.inner.lock().slave_counts
    }

    /// Records the row selector of a decoded reading. An arm-row frame that
    /// does not directly follow another arm-row frame starts a new period.
    pub fn note_row(&self, k: RowSelector) {
        let mut inner = self.inner.lock();
        if k == protocol::ARM_ROW && inner.last_k != Some(protocol::ARM_ROW) {
            let now = Utc::now();
            inner.period = PeriodState {
                active: true,
                period_start: Some(now),
            };
            log::debug!("new sampling period at {now}");
        }
        inner.last_k = Some(k);
    }

    pub fn period_state(&self) -> PeriodState {
        self.inner.lock().period
    }

    pub fn last_k(&self) -> Option<RowSelector> {
        self.inner.lock().last_k
    }
}

fn values_of_arm(rows: &BTreeMap<RowSelector, BTreeMap<DataType, Reading>>) -> ArmSnapshot {
    rows.iter()
        .map(|(&k, fields)| {
            let values = fields.iter().map(|(&d, r)| (d, r.value)).collect();
            (k, values)
        })
        .collect()
}
