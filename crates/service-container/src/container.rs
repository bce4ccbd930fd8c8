//! Service container implementation
//!
//! All bookkeeping happens under one lock; `start`/`stop` calls run as
//! spawned tasks so a slow service never blocks the caller. Every state
//! change is broadcast to subscribers, which is what stability waits use.

use crate::error::{ContainerError, Result, StartError};
use crate::models::*;
use crate::service::Service;
use async_channel::{Receiver, Sender};
use async_runtime_compat::{Spawner, ThreadSpawner, runtime_utils};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use indexmap::IndexMap;
use std::collections::{BTreeSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

struct Entry {
    service: Arc<dyn Service>,
    dependencies: Vec<ServiceName>,
    state: ServiceState,
    mode: ServiceMode,
    failure: Option<String>,
    last_state_change: DateTime<Utc>,
    generation: u64,
}

impl Entry {
    fn snapshot(&self, name: &ServiceName) -> ServiceController {
        ServiceController {
            name: name.clone(),
            state: self.state,
            mode: self.mode,
            dependencies: self.dependencies.clone(),
            failure: self.failure.clone(),
            last_state_change: self.last_state_change,
        }
    }
}

#[derive(Default)]
struct State {
    services: IndexMap<ServiceName, Entry>,
    next_generation: u64,
}

enum Task {
    Start {
        name: ServiceName,
        service: Arc<dyn Service>,
        generation: u64,
    },
    Stop {
        name: ServiceName,
        service: Arc<dyn Service>,
        generation: u64,
    },
}

/// Work produced under the state lock, applied after it is released
#[derive(Default)]
struct Effects {
    events: Vec<ServiceEvent>,
    tasks: Vec<Task>,
}

struct Inner {
    state: Mutex<State>,
    subscribers: Mutex<Vec<Sender<ServiceEvent>>>,
    spawner: Arc<dyn Spawner>,
}

/// Dependency-aware service container
#[derive(Clone)]
pub struct ServiceContainer {
    inner: Arc<Inner>,
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("services", &self.lock_state().services.len())
            .finish()
    }
}

impl ServiceContainer {
    /// Create a container running lifecycle tasks on dedicated threads
    pub fn new() -> Self {
        Self::with_spawner(Arc::new(ThreadSpawner))
    }

    /// Create a container running lifecycle tasks on `spawner`
    pub fn with_spawner(spawner: Arc<dyn Spawner>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                subscribers: Mutex::new(Vec::new()),
                spawner,
            }),
        }
    }

    /// Handle used to install services
    pub fn service_target(&self) -> ServiceTarget {
        ServiceTarget {
            container: self.clone(),
        }
    }

    /// Start building a service installation
    pub fn add_service(&self, name: impl Into<ServiceName>, service: impl Service) -> ServiceBuilder {
        ServiceBuilder {
            container: self.clone(),
            name: name.into(),
            service: Arc::new(service),
            dependencies: Vec::new(),
        }
    }

    fn install(
        &self,
        name: ServiceName,
        service: Arc<dyn Service>,
        dependencies: Vec<ServiceName>,
    ) -> Result<ServiceController> {
        let mut effects = Effects::default();
        let controller = {
            let mut state = self.lock_state();
            if state.services.contains_key(&name) {
                return Err(ContainerError::DuplicateService(name));
            }
            state.next_generation += 1;
            let entry = Entry {
                service,
                dependencies,
                state: ServiceState::Down,
                mode: ServiceMode::Active,
                failure: None,
                last_state_change: Utc::now(),
                generation: state.next_generation,
            };
            info!("Installing service {} (deps: {:?})", name, entry.dependencies);
            state.services.insert(name.clone(), entry);

            let seeds = neighbours(&state, &name);
            settle(&mut state, std::iter::once(name.clone()).chain(seeds), &mut effects);
            state
                .services
                .get(&name)
                .map(|entry| entry.snapshot(&name))
                .ok_or_else(|| ContainerError::ServiceNotFound(name.clone()))?
        };
        self.apply(effects);
        Ok(controller)
    }

    /// Switch a service to [`ServiceMode::Remove`].
    ///
    /// Dependents are stopped first; the service leaves the container once it
    /// is down.
    pub fn remove(&self, name: &ServiceName) -> Result<()> {
        let mut effects = Effects::default();
        {
            let mut state = self.lock_state();
            let entry = state
                .services
                .get_mut(name)
                .ok_or_else(|| ContainerError::ServiceNotFound(name.clone()))?;
            if entry.mode == ServiceMode::Remove {
                return Ok(());
            }
            debug!("Service {} set to mode REMOVE", name);
            entry.mode = ServiceMode::Remove;
            let seeds = neighbours(&state, name);
            settle(&mut state, std::iter::once(name.clone()).chain(seeds), &mut effects);
        }
        self.apply(effects);
        Ok(())
    }

    /// Look up a service
    pub fn get_service(&self, name: &ServiceName) -> Option<ServiceController> {
        let state = self.lock_state();
        state.services.get(name).map(|entry| entry.snapshot(name))
    }

    /// All installed services in installation order
    pub fn services(&self) -> Vec<ServiceController> {
        let state = self.lock_state();
        state
            .services
            .iter()
            .map(|(name, entry)| entry.snapshot(name))
            .collect()
    }

    /// Whether no service is starting or stopping
    pub fn is_stable(&self) -> bool {
        let state = self.lock_state();
        !state.services.values().any(|e| e.state.is_transitional())
    }

    /// Current problems of active services
    pub fn problems(&self) -> BTreeSet<ServiceProblem> {
        let state = self.lock_state();
        let mut problems = BTreeSet::new();
        for (name, entry) in &state.services {
            if entry.mode != ServiceMode::Active {
                continue;
            }
            match entry.state {
                ServiceState::StartFailed => {
                    problems.insert(ServiceProblem::StartFailed {
                        service: name.clone(),
                        reason: entry.failure.clone().unwrap_or_default(),
                    });
                }
                ServiceState::Down => {
                    for dependency in &entry.dependencies {
                        let problem = match state.services.get(dependency) {
                            Some(dep) if dep.mode == ServiceMode::Active => {
                                if matches!(dep.state, ServiceState::Down | ServiceState::StartFailed) {
                                    Some(ServiceProblem::UnavailableDependency {
                                        service: name.clone(),
                                        dependency: dependency.clone(),
                                    })
                                } else {
                                    None
                                }
                            }
                            _ => Some(ServiceProblem::MissingDependency {
                                service: name.clone(),
                                dependency: dependency.clone(),
                            }),
                        };
                        problems.extend(problem);
                    }
                }
                _ => {}
            }
        }
        problems
    }

    /// Receive every subsequent state change
    pub fn subscribe(&self) -> Receiver<ServiceEvent> {
        let (tx, rx) = async_channel::unbounded();
        self.lock_subscribers().push(tx);
        rx
    }

    /// Wait until no service is starting or stopping
    pub async fn await_stability(&self, timeout: Duration) -> Result<()> {
        // Subscribe before checking so no change slips in between
        let events = self.subscribe();
        // A timeout past the end of the clock has no deadline
        let deadline = Instant::now().checked_add(timeout);
        loop {
            if self.is_stable() {
                return Ok(());
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if remaining.is_zero() {
                return Err(ContainerError::StabilityTimeout(timeout));
            }
            match runtime_utils::timeout(remaining, events.recv()).await {
                Some(Ok(_)) => continue,
                // Only possible if the subscriber list was cleared; re-check
                Some(Err(_)) => return self.settled_or_timeout(timeout),
                None => return Err(ContainerError::StabilityTimeout(timeout)),
            }
        }
    }

    fn settled_or_timeout(&self, timeout: Duration) -> Result<()> {
        if self.is_stable() {
            Ok(())
        } else {
            Err(ContainerError::StabilityTimeout(timeout))
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<Sender<ServiceEvent>>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply(&self, effects: Effects) {
        if !effects.events.is_empty() {
            let mut subscribers = self.lock_subscribers();
            subscribers.retain(|tx| !tx.is_closed());
            for tx in subscribers.iter() {
                for event in &effects.events {
                    let _ = tx.try_send(event.clone());
                }
            }
        }
        for task in effects.tasks {
            self.spawn(task);
        }
    }

    fn spawn(&self, task: Task) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let future = match task {
            Task::Start {
                name,
                service,
                generation,
            } => async move {
                let result = match AssertUnwindSafe(service.start()).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => Err(StartError::new("service panicked during start")),
                };
                if let Some(inner) = weak.upgrade() {
                    ServiceContainer { inner }.start_completed(name, generation, result);
                }
            }
            .boxed(),
            Task::Stop {
                name,
                service,
                generation,
            } => async move {
                if AssertUnwindSafe(service.stop()).catch_unwind().await.is_err() {
                    warn!("Service {} panicked during stop", name);
                }
                if let Some(inner) = weak.upgrade() {
                    ServiceContainer { inner }.stop_completed(name, generation);
                }
            }
            .boxed(),
        };
        self.inner.spawner.spawn(future);
    }

    fn start_completed(
        &self,
        name: ServiceName,
        generation: u64,
        result: std::result::Result<(), StartError>,
    ) {
        let mut effects = Effects::default();
        {
            let mut state = self.lock_state();
            let Some(entry) = state.services.get_mut(&name) else {
                return;
            };
            if entry.generation != generation || entry.state != ServiceState::Starting {
                return;
            }
            match result {
                Ok(()) => {
                    info!("Service {} is up", name);
                    entry.failure = None;
                    transition(&name, entry, ServiceState::Up, &mut effects);
                }
                Err(e) => {
                    warn!("Service {} failed to start: {}", name, e);
                    entry.failure = Some(e.0);
                    transition(&name, entry, ServiceState::StartFailed, &mut effects);
                }
            }
            let seeds = neighbours(&state, &name);
            settle(&mut state, std::iter::once(name).chain(seeds), &mut effects);
        }
        self.apply(effects);
    }

    fn stop_completed(&self, name: ServiceName, generation: u64) {
        let mut effects = Effects::default();
        {
            let mut state = self.lock_state();
            let Some(entry) = state.services.get_mut(&name) else {
                return;
            };
            if entry.generation != generation || entry.state != ServiceState::Stopping {
                return;
            }
            debug!("Service {} is down", name);
            transition(&name, entry, ServiceState::Down, &mut effects);
            let seeds = neighbours(&state, &name);
            settle(&mut state, std::iter::once(name).chain(seeds), &mut effects);
        }
        self.apply(effects);
    }

    /// Check if a state transition is valid
    fn is_valid_transition(from: ServiceState, to: ServiceState) -> bool {
        use ServiceState::*;

        matches!(
            (from, to),
            (Down, Starting)
                | (Starting, Up)
                | (Starting, StartFailed)
                | (Up, Stopping)
                | (Stopping, Down)
                | (Down, Removed)
                | (StartFailed, Removed)
        )
    }
}

fn transition(name: &ServiceName, entry: &mut Entry, to: ServiceState, effects: &mut Effects) {
    let from = entry.state;
    if !ServiceContainer::is_valid_transition(from, to) {
        warn!(
            "Ignoring {} for service {}",
            ContainerError::InvalidStateTransition { from, to },
            name
        );
        return;
    }
    debug!("Service {} state: {:?} -> {:?}", name, from, to);
    entry.state = to;
    entry.last_state_change = Utc::now();
    effects.events.push(ServiceEvent {
        name: name.clone(),
        old_state: from,
        new_state: to,
        timestamp: entry.last_state_change,
    });
}

fn dependencies_up(state: &State, dependencies: &[ServiceName]) -> bool {
    dependencies.iter().all(|dep| {
        state
            .services
            .get(dep)
            .is_some_and(|e| e.state == ServiceState::Up && e.mode == ServiceMode::Active)
    })
}

fn dependents_of(state: &State, name: &ServiceName) -> Vec<ServiceName> {
    state
        .services
        .iter()
        .filter(|(_, e)| e.dependencies.contains(name))
        .map(|(n, _)| n.clone())
        .collect()
}

fn neighbours(state: &State, name: &ServiceName) -> Vec<ServiceName> {
    let mut names = dependents_of(state, name);
    if let Some(entry) = state.services.get(name) {
        names.extend(entry.dependencies.iter().cloned());
    }
    names
}

/// Drive every affected service towards its desired state
fn settle(state: &mut State, seeds: impl IntoIterator<Item = ServiceName>, effects: &mut Effects) {
    let mut queue: VecDeque<ServiceName> = seeds.into_iter().collect();
    while let Some(name) = queue.pop_front() {
        let Some(entry) = state.services.get(&name) else {
            continue;
        };
        let wanted_up =
            entry.mode == ServiceMode::Active && dependencies_up(state, &entry.dependencies);
        let dependents_running = dependents_of(state, &name).iter().any(|d| {
            state.services.get(d).is_some_and(|e| {
                matches!(
                    e.state,
                    ServiceState::Up | ServiceState::Starting | ServiceState::Stopping
                )
            })
        });
        let next = match entry.state {
            ServiceState::Down if wanted_up => ServiceState::Starting,
            ServiceState::Down | ServiceState::StartFailed if entry.mode == ServiceMode::Remove => {
                ServiceState::Removed
            }
            ServiceState::Up if !wanted_up && !dependents_running => ServiceState::Stopping,
            _ => continue,
        };

        let affected = neighbours(state, &name);
        if next == ServiceState::Removed {
            if let Some(mut entry) = state.services.shift_remove(&name) {
                transition(&name, &mut entry, ServiceState::Removed, effects);
                info!("Service {} removed", name);
            }
        } else if let Some(entry) = state.services.get_mut(&name) {
            transition(&name, entry, next, effects);
            let service = entry.service.clone();
            let generation = entry.generation;
            effects.tasks.push(match next {
                ServiceState::Starting => Task::Start {
                    name: name.clone(),
                    service,
                    generation,
                },
                _ => Task::Stop {
                    name: name.clone(),
                    service,
                    generation,
                },
            });
        }
        queue.extend(affected);
    }
}

/// Installs services into a container
#[derive(Clone, Debug)]
pub struct ServiceTarget {
    container: ServiceContainer,
}

impl ServiceTarget {
    /// Start building a service installation
    pub fn add_service(&self, name: impl Into<ServiceName>, service: impl Service) -> ServiceBuilder {
        self.container.add_service(name, service)
    }

    /// The container this target installs into
    pub fn container(&self) -> &ServiceContainer {
        &self.container
    }
}

/// Pending installation of one service
pub struct ServiceBuilder {
    container: ServiceContainer,
    name: ServiceName,
    service: Arc<dyn Service>,
    dependencies: Vec<ServiceName>,
}

impl ServiceBuilder {
    /// Require `name` to be up before this service starts
    pub fn add_dependency(mut self, name: impl Into<ServiceName>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    /// Install the service; it starts once its dependencies are up
    pub fn install(self) -> Result<ServiceController> {
        self.container
            .install(self.name, self.service, self.dependencies)
    }
}
