use std::collections::{BTreeMap, BTreeSet};

use shared::domain::{CounterId, ServiceType};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("counter layout names no service types")]
    NoServices,
    #[error("service {0} has no counters")]
    EmptyService(ServiceType),
    #[error("counter {counter} is bound to both {first} and {second}")]
    SharedCounter {
        counter: CounterId,
        first: ServiceType,
        second: ServiceType,
    },
}

/// Binds every service type to a disjoint, non-empty set of counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterLayout {
    services: BTreeMap<ServiceType, BTreeSet<CounterId>>,
    owners: BTreeMap<CounterId, ServiceType>,
    default_service: ServiceType,
}

impl CounterLayout {
    pub fn new<I, C>(bindings: I) -> Result<Self, LayoutError>
    where
        I: IntoIterator<Item = (ServiceType, C)>,
        C: IntoIterator<Item = CounterId>,
    {
        let mut services: BTreeMap<ServiceType, BTreeSet<CounterId>> = BTreeMap::new();
        let mut owners = BTreeMap::new();

        for (service, counters) in bindings {
            let slot = services.entry(service).or_default();
            for counter in counters {
                if let Some(first) = owners.insert(counter, service) {
                    if first != service {
                        return Err(LayoutError::SharedCounter {
                            counter,
                            first,
                            second: service,
                        });
                    }
                }
                slot.insert(counter);
            }
        }

        if let Some((service, _)) = services.iter().find(|(_, counters)| counters.is_empty()) {
            return Err(LayoutError::EmptyService(*service));
        }
        let Some(default_service) = services.keys().next().copied() else {
            return Err(LayoutError::NoServices);
        };

        Ok(Self {
            services,
            owners,
            default_service,
        })
    }

    pub fn service_for(&self, counter: CounterId) -> Option<ServiceType> {
        self.owners.get(&counter).copied()
    }

    pub fn counters_for(&self, service: ServiceType) -> impl Iterator<Item = CounterId> + '_ {
        self.services.get(&service).into_iter().flatten().copied()
    }

    pub fn contains_service(&self, service: ServiceType) -> bool {
        self.services.contains_key(&service)
    }

    pub fn contains_counter(&self, counter: CounterId) -> bool {
        self.owners.contains_key(&counter)
    }

    pub fn services(&self) -> impl Iterator<Item = ServiceType> + '_ {
        self.services.keys().copied()
    }

    pub fn counters(&self) -> impl Iterator<Item = CounterId> + '_ {
        self.owners.keys().copied()
    }

    /// Lowest service letter; adopts tickets migrated from documents that
    /// predate service partitioning.
    pub fn default_service(&self) -> ServiceType {
        self.default_service
    }
}

impl Default for CounterLayout {
    /// Registration at counters 1 and 2, inquiries at counter 3.
    fn default() -> Self {
        let bindings: [(ServiceType, &[u8]); 2] = [
            (ServiceType::REGISTRATION, &[1, 2]),
            (ServiceType::INQUIRY, &[3]),
        ];
        let mut services: BTreeMap<ServiceType, BTreeSet<CounterId>> = BTreeMap::new();
        let mut owners = BTreeMap::new();
        for (service, numbers) in bindings {
            for counter in numbers.iter().copied().filter_map(CounterId::checked) {
                services.entry(service).or_default().insert(counter);
                owners.insert(counter, service);
            }
        }
        Self {
            services,
            owners,
            default_service: ServiceType::REGISTRATION,
        }
    }
}

#[cfg(test)]
#[path = "tests/layout_tests.rs"]
mod tests;
