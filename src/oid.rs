//! OID view of the telemetry store.
//!
//! Everything lives under one private prefix (`1.3.6.5` by default):
//!
//! | suffix             | value                                   |
//! |--------------------|-----------------------------------------|
//! | `1.0`              | build / platform banner                 |
//! | `2.0`              | number of battery rows (k > 2)          |
//! | `3.0`              | number of arms with readings            |
//! | `4.0`              | status, always `1`                      |
//! | `5.0`              | local time of the request               |
//! | `6.0`              | number of stored readings               |
//! | `7.0` .. `10.0`    | slave counts of arms 1..4               |
//! | `10.arm.k.dtype.0` | latest reading, `0` when none is stored |
//!
//! The battery subtree always publishes the registered grid (arms 1..4,
//! k 2..5, dtypes 10..14 and 126) so a walk sees the same shape whether or
//! not data has arrived. Readings outside the grid are published as well.
//!
//! All lookups are pure functions of a store snapshot and the request.

use crate::{
    store::{Snapshot, TelemetryStore},
    Error,
};
use chrono::Local;
use std::{
    collections::BTreeMap,
    fmt,
    ops::Bound::{Excluded, Unbounded},
    str::FromStr,
    sync::Arc,
};

pub const DEFAULT_PREFIX: &str = "1.3.6.5";
pub const STATUS_OK: &str = "1";
/// Value of a registered battery OID without a stored reading.
pub const MISSING_READING: &str = "0";

const REGISTERED_ARMS: std::ops::RangeInclusive<u8> = 1..=4;
const REGISTERED_ROWS: std::ops::RangeInclusive<u8> = 2..=5;
const REGISTERED_DTYPES: [u8; 6] = [10, 11, 12, 13, 14, 126];

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(components: Vec<u32>) -> Self {
        Self(components)
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn join(&self, suffix: &[u32]) -> Oid {
        let mut components = self.0.clone();
        components.extend_from_slice(suffix);
        Oid(components)
    }
}

impl FromStr for Oid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(Error::InvalidOid(s.to_string()));
        }
        trimmed
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map(Oid)
            .map_err(|_| Error::InvalidOid(s.to_string()))
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OidValue {
    Str(String),
    NoSuchObject,
    EndOfMibView,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: OidValue,
}

impl VarBind {
    pub fn new(oid: Oid, value: OidValue) -> Self {
        Self { oid, value }
    }
}

#[derive(Debug, Clone, Copy)]
enum Component {
    Fixed(u32),
    Any,
}

#[derive(Clone, Copy)]
enum Resolver {
    Scalar(fn(&Snapshot) -> String),
    /// `arm.k.dtype` taken from the wildcard components
    Reading,
}

impl Resolver {
    fn is_reading(&self) -> bool {
        matches!(self, Resolver::Reading)
    }
}

#[derive(Clone)]
struct Route {
    name: &'static str,
    pattern: Vec<Component>,
    resolver: Resolver,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Route({} {:?})", self.name, self.pattern)
    }
}

impl Route {
    fn scalar(name: &'static str, id: u32, resolve: fn(&Snapshot) -> String) -> Self {
        Self {
            name,
            pattern: vec![Component::Fixed(id), Component::Fixed(0)],
            resolver: Resolver::Scalar(resolve),
        }
    }

    fn matches(&self, suffix: &[u32]) -> bool {
        suffix.len() == self.pattern.len()
            && self.pattern.iter().zip(suffix).all(|(c, &n)| match c {
                Component::Fixed(id) => *id == n,
                Component::Any => true,
            })
    }

    /// Every suffix this route answers for in `snapshot`, with its value.
    fn instances(&self, snapshot: &Snapshot) -> Vec<(Vec<u32>, String)> {
        match self.resolver {
            Resolver::Scalar(resolve) => {
                let suffix = self
                    .pattern
                    .iter()
                    .map(|c| match c {
                        Component::Fixed(id) => *id,
                        Component::Any => 0,
                    })
                    .collect();
                vec![(suffix, resolve(snapshot))]
            }
            Resolver::Reading => {
                let mut values = BTreeMap::new();
                for arm in REGISTERED_ARMS {
                    for k in REGISTERED_ROWS {
                        for dtype in REGISTERED_DTYPES {
                            values.insert([arm, k, dtype], MISSING_READING.to_string());
                        }
                    }
                }
                for (&arm, rows) in &snapshot.readings {
                    for (&k, fields) in rows {
                        for (&dtype, reading) in fields {
                            values.insert([arm, k, dtype], format_value(reading.value));
                        }
                    }
                }
                values
                    .into_iter()
                    .map(|(key, value)| (self.fill(&key.map(u32::from)), value))
                    .collect()
            }
        }
    }

    fn fill(&self, wildcards: &[u32]) -> Vec<u32> {
        let mut values = wildcards.iter();
        self.pattern
            .iter()
            .map(|c| match c {
                Component::Fixed(id) => *id,
                Component::Any => values.next().copied().unwrap_or(0),
            })
            .collect()
    }
}

fn default_routes() -> Vec<Route> {
    use Component::{Any, Fixed};
    vec![
        Route::scalar("banner", 1, |_| banner()),
        Route::scalar("batteryCount", 2, |s| s.battery_row_count().to_string()),
        Route::scalar("armCount", 3, |s| s.arm_count().to_string()),
        Route::scalar("systemStatus", 4, |_| STATUS_OK.to_string()),
        Route::scalar("lastUpdateTime", 5, |s| {
            s.taken_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        }),
        Route::scalar("dataCount", 6, |s| s.entry_count().to_string()),
        Route::scalar("arm1SlaveCount", 7, |s| s.slave_count(1).to_string()),
        Route::scalar("arm2SlaveCount", 8, |s| s.slave_count(2).to_string()),
        Route::scalar("arm3SlaveCount", 9, |s| s.slave_count(3).to_string()),
        Route::scalar("arm4SlaveCount", 10, |s| s.slave_count(4).to_string()),
        Route {
            name: "batteryData",
            pattern: vec![Fixed(10), Any, Any, Any, Fixed(0)],
            resolver: Resolver::Reading,
        },
    ]
}

pub fn banner() -> String {
    format!(
        "armbms-gateway {} running on {}/{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Renders a reading the way the values were published historically:
/// integral values keep one decimal (`100.0`), others print as-is.
pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Resolved OID tree for one snapshot.
#[derive(Debug)]
pub struct OidView<'a> {
    prefix: &'a Oid,
    routes: &'a [Route],
    entries: BTreeMap<Oid, String>,
}

impl OidView<'_> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, oid: &Oid) -> OidValue {
        if let Some(value) = self.entries.get(oid) {
            return OidValue::Str(value.clone());
        }
        let reading_oid = oid.starts_with(self.prefix)
            && self.routes.iter().any(|r| {
                r.resolver.is_reading()
                    && r.matches(&oid.components()[self.prefix.components().len()..])
            });
        if reading_oid {
            OidValue::Str(MISSING_READING.to_string())
        } else {
            OidValue::NoSuchObject
        }
    }

    /// Lexicographic successor of `oid`.
    pub fn next(&self, oid: &Oid) -> VarBind {
        match self.entries.range((Excluded(oid), Unbounded)).next() {
            Some((next, value)) => VarBind::new(next.clone(), OidValue::Str(value.clone())),
            None => VarBind::new(oid.clone(), OidValue::EndOfMibView),
        }
    }

    /// GETBULK: the first `non_repeaters` OIDs get one successor each, the
    /// rest are walked `max_repetitions` times, interleaved per repetition.
    pub fn bulk(&self, non_repeaters: usize, max_repetitions: usize, oids: &[Oid]) -> Vec<VarBind> {
        let split = non_repeaters.min(oids.len());
        let (singles, repeaters) = oids.split_at(split);
        let mut result: Vec<VarBind> = singles.iter().map(|oid| self.next(oid)).collect();

        let mut cursors: Vec<Oid> = repeaters.to_vec();
        for _ in 0..max_repetitions {
            if cursors.is_empty() {
                break;
            }
            let row: Vec<VarBind> = cursors.iter().map(|oid| self.next(oid)).collect();
            let exhausted = row.iter().all(|vb| vb.value == OidValue::EndOfMibView);
            cursors = row.iter().map(|vb| vb.oid.clone()).collect();
            result.extend(row);
            if exhausted {
                break;
            }
        }
        result
    }
}

#[derive(Debug, Clone)]
pub struct OidMapper {
    prefix: Oid,
    routes: Vec<Route>,
    store: Arc<TelemetryStore>,
}

impl OidMapper {
    pub fn new(prefix: Oid, store: Arc<TelemetryStore>) -> Self {
        Self {
            prefix,
            routes: default_routes(),
            store,
        }
    }

    pub fn prefix(&self) -> &Oid {
        &self.prefix
    }

    /// Resolves every route against `snapshot`.
    pub fn view_of(&self, snapshot: &Snapshot) -> OidView<'_> {
        let entries = self
            .routes
            .iter()
            .flat_map(|route| route.instances(snapshot))
            .map(|(suffix, value)| (self.prefix.join(&suffix), value))
            .collect();
        OidView {
            prefix: &self.prefix,
            routes: &self.routes,
            entries,
        }
    }

    pub fn view(&self) -> OidView<'_> {
        self.view_of(&self.store.snapshot())
    }

    pub fn get(&self, oid: &Oid) -> OidValue {
        self.view().get(oid)
    }

    pub fn get_next(&self, oid: &Oid) -> VarBind {
        self.view().next(oid)
    }

    pub fn get_bulk(
        &self,
        non_repeaters: usize,
        max_repetitions: usize,
        oids: &[Oid],
    ) -> Vec<VarBind> {
        self.view().bulk(non_repeaters, max_repetitions, oids)
    }
}
