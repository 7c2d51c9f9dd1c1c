//! Parameter sources feeding operation runners.
//!
//! A [`ParamSource`] is partitioned once per worker; the resulting
//! [`ParamProvider`] yields one parameter map per iteration. Sources may
//! be finite (`size` returns a count) or infinite (`size` returns
//! `None`), which drives the shape of time-period schedules.

use anyhow::Result;

/// The parameter payload handed to a runner for one iteration.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// A partitionable source of operation parameters.
pub trait ParamSource: Send + Sync {
    /// Returns this worker's slice of the source.
    ///
    /// `client_index` must be in `[0, num_clients)`.
    fn partition(&self, client_index: u32, num_clients: u32) -> Box<dyn ParamProvider>;
}

/// A worker's iterator over its parameter partition.
pub trait ParamProvider: Send {
    /// Number of parameter sets this provider will yield, or `None` when
    /// the provider is infinite.
    fn size(&self) -> Option<u64>;

    /// Yields the next parameter set, `None` once the provider is
    /// exhausted. Errors are fatal for the benchmark.
    fn next_params(&mut self) -> Result<Option<Params>>;
}

/// An infinite source that yields the same parameters on every iteration.
#[derive(Debug, Clone, Default)]
pub struct StaticParams {
    params: Params,
}

impl StaticParams {
    /// Creates a source yielding the given parameters forever.
    pub fn new(params: Params) -> Self {
        Self { params }
    }
}

impl ParamSource for StaticParams {
    fn partition(&self, _client_index: u32, _num_clients: u32) -> Box<dyn ParamProvider> {
        Box::new(StaticProvider { params: self.params.clone() })
    }
}

struct StaticProvider {
    params: Params,
}

impl ParamProvider for StaticProvider {
    fn size(&self) -> Option<u64> {
        None
    }

    fn next_params(&mut self) -> Result<Option<Params>> {
        Ok(Some(self.params.clone()))
    }
}

/// A finite list of parameter sets, dealt round-robin across workers.
#[derive(Debug, Clone)]
pub struct FiniteParams {
    items: Vec<Params>,
}

impl FiniteParams {
    /// Creates a finite source from the given parameter sets.
    pub fn new(items: Vec<Params>) -> Self {
        Self { items }
    }
}

impl ParamSource for FiniteParams {
    fn partition(&self, client_index: u32, num_clients: u32) -> Box<dyn ParamProvider> {
        let items: Vec<Params> = self
            .items
            .iter()
            .skip(client_index as usize)
            .step_by(num_clients.max(1) as usize)
            .cloned()
            .collect();
        Box::new(FiniteProvider { items: items.into_iter() })
    }
}

struct FiniteProvider {
    items: std::vec::IntoIter<Params>,
}

impl ParamProvider for FiniteProvider {
    fn size(&self) -> Option<u64> {
        Some(self.items.len() as u64)
    }

    fn next_params(&mut self) -> Result<Option<Params>> {
        Ok(self.items.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(v: i64) -> Params {
        let mut p = Params::new();
        p.insert("value".into(), v.into());
        p
    }

    #[test]
    fn static_source_is_infinite() {
        let source = StaticParams::new(params(7));
        let mut provider = source.partition(0, 2);
        assert_eq!(provider.size(), None);
        for _ in 0..10 {
            assert_eq!(provider.next_params().unwrap().unwrap()["value"], 7);
        }
    }

    #[test]
    fn finite_source_partitions_round_robin() {
        let source = FiniteParams::new((0..7).map(params).collect());
        let mut first = source.partition(0, 2);
        let mut second = source.partition(1, 2);
        assert_eq!(first.size(), Some(4));
        assert_eq!(second.size(), Some(3));
        assert_eq!(first.next_params().unwrap().unwrap()["value"], 0);
        assert_eq!(second.next_params().unwrap().unwrap()["value"], 1);
        assert_eq!(first.next_params().unwrap().unwrap()["value"], 2);
    }

    #[test]
    fn finite_provider_reports_exhaustion() {
        let source = FiniteParams::new(vec![params(1)]);
        let mut provider = source.partition(0, 1);
        assert!(provider.next_params().unwrap().is_some());
        assert!(provider.next_params().unwrap().is_none());
    }
}
