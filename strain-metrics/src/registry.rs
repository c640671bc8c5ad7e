use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind, validate_value};
use crate::snapshot::{SeriesSnapshot, SeriesValue, Snapshot};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: KeyId,
    kind: MetricKind,
}

/// Concurrent accumulator for every metric of a run.
///
/// Writers only touch in-memory atomics or a per-series histogram lock; nothing here performs
/// I/O. Series are created lazily on first write.
#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<MetricDef>>,
    storage: DashMap<MetricId, DashMap<TagSet, MetricHandle>>,
}

impl Registry {
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        let name_id = self.interner.get_or_intern(name);

        let mut defs = self.defs.write();
        if let Some((idx, def)) = defs.iter().enumerate().find(|(_, d)| d.name == name_id) {
            if def.kind != kind {
                return Err(Error::KindMismatch {
                    name: name.to_string(),
                    existing: def.kind,
                    requested: kind,
                });
            }
            return Ok(MetricId(idx as u32));
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: name_id,
            kind,
        });
        self.storage.insert(id, DashMap::new());
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<(MetricId, MetricKind)> {
        let name_id = self.interner.get(name)?;
        let defs = self.defs.read();
        defs.iter()
            .enumerate()
            .find(|(_, d)| d.name == name_id)
            .map(|(idx, d)| (MetricId(idx as u32), d.kind))
    }

    pub fn resolve_tags(&self, tags: &[(&str, &str)]) -> TagSet {
        TagSet::from_pairs(tags.iter().map(|(k, v)| {
            (
                self.interner.get_or_intern(k),
                self.interner.get_or_intern(v),
            )
        }))
    }

    /// Returns the write handle for `(metric, tags)`, creating the series if needed.
    pub fn handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        let kind = self.defs.read().get(metric.0 as usize)?.kind;
        let series_map = self.storage.get(&metric)?;

        if let Some(existing) = series_map.get(&tags) {
            return Some(existing.value().clone());
        }

        // The entry API keeps concurrent first writers on the same storage.
        let handle = series_map
            .entry(tags)
            .or_insert_with(|| MetricHandle::new(kind))
            .value()
            .clone();
        Some(handle)
    }

    /// Records one observation, registering `name` on first use.
    pub fn record(
        &self,
        name: &str,
        kind: MetricKind,
        value: f64,
        tags: &[(&str, &str)],
    ) -> Result<()> {
        if !validate_value(kind, value) {
            return Err(Error::InvalidValue {
                name: name.to_string(),
                kind,
                value,
            });
        }

        let id = match self.lookup(name) {
            Some((id, existing)) if existing == kind => id,
            Some((_, existing)) => {
                return Err(Error::KindMismatch {
                    name: name.to_string(),
                    existing,
                    requested: kind,
                });
            }
            None => self.register(name, kind)?,
        };

        if let Some(h) = self.handle(id, self.resolve_tags(tags)) {
            h.record(value);
        }
        Ok(())
    }

    /// Sums a counter over the series tagged `key=value`, without building a snapshot.
    pub fn counter_total(&self, name: &str, key: &str, value: &str) -> u64 {
        let Some((id, MetricKind::Counter)) = self.lookup(name) else {
            return 0;
        };
        let (Some(k), Some(v)) = (self.interner.get(key), self.interner.get(value)) else {
            return 0;
        };
        let Some(series_map) = self.storage.get(&id) else {
            return 0;
        };

        series_map
            .iter()
            .filter(|s| s.key().get(k) == Some(v))
            .map(|s| match s.value() {
                MetricHandle::Counter(c) => c.load(Ordering::Relaxed),
                _ => 0,
            })
            .sum()
    }

    /// Copies every series into an immutable, sorted snapshot.
    pub fn snapshot(&self) -> Snapshot {
        let defs = self.defs.read();
        let resolve = |id: KeyId| {
            self.interner
                .resolve(id)
                .map(|s| s.to_string())
                .unwrap_or_default()
        };

        let mut out = Vec::new();
        for entry in self.storage.iter() {
            let Some(def) = defs.get(entry.key().0 as usize) else {
                continue;
            };
            let name = resolve(def.name);

            for series in entry.value().iter() {
                let mut tags: Vec<(String, String)> = series
                    .key()
                    .iter()
                    .map(|(k, v)| (resolve(k), resolve(v)))
                    .collect();
                tags.sort();

                let value = match series.value() {
                    MetricHandle::Counter(c) => SeriesValue::Counter(c.load(Ordering::Relaxed)),
                    MetricHandle::Rate(r) => SeriesValue::Rate {
                        total: r.total.load(Ordering::Relaxed),
                        hits: r.hits.load(Ordering::Relaxed),
                    },
                    MetricHandle::Trend(h) => SeriesValue::Trend(h.lock().clone()),
                };

                out.push(SeriesSnapshot {
                    name: name.clone(),
                    kind: def.kind,
                    tags,
                    value,
                });
            }
        }

        Snapshot::from_series(out)
    }
}
