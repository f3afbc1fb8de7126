//! Lifecycle scheduler, the per-frame phase driver.
//!
//! Systems register for named phases. Each frame runs every phase in a
//! fixed order; within a phase, subscribed systems run in registration
//! order. Flush phases sit between the two per-frame passes, so a system
//! that defers structural changes to its flush phases never sees them
//! applied in the middle of a pass.

use std::any::Any;
use std::collections::BTreeMap;

use tracing::{debug, trace};

/// One step of a frame. Variants are declared in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Apply completed loads and activate staged instances.
    FlushActivations,
    /// Per-frame `update(dt)`.
    Update,
    /// Apply structural changes requested during `Update`.
    FlushUserRequestedChanges,
    /// Per-frame `postUpdate(dt)`.
    PostUpdate,
    /// Destroy retired instances.
    FlushRetirements,
}

impl Phase {
    /// Every phase, in execution order.
    pub const ALL: [Phase; 5] = [
        Phase::FlushActivations,
        Phase::Update,
        Phase::FlushUserRequestedChanges,
        Phase::PostUpdate,
        Phase::FlushRetirements,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::FlushActivations => "flush_activations",
            Self::Update => "update",
            Self::FlushUserRequestedChanges => "flush_user_requested_changes",
            Self::PostUpdate => "post_update",
            Self::FlushRetirements => "flush_retirements",
        }
    }
}

/// Frame metadata handed to every phase callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    /// Monotonically increasing frame counter, starting at 1.
    pub frame: u64,
    /// Delta time since the last frame, in seconds.
    pub dt: f64,
}

/// A system driven by the scheduler.
pub trait FrameSystem: 'static {
    /// Unique name used for lookup and logging.
    fn name(&self) -> &str;

    /// Phases this system wants to be called for.
    fn phases(&self) -> &[Phase] {
        &Phase::ALL
    }

    /// Run one phase.
    fn run_phase(&mut self, phase: Phase, frame: FrameInfo);
}

/// Another system with the same name is already registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("a system named `{0}` is already registered")]
pub struct DuplicateSystem(pub String);

/// Type-erased registration of one system.
struct Registered {
    name: String,
    phases: Vec<Phase>,
    system: Box<dyn Any>,
    run_fn: fn(&mut dyn Any, Phase, FrameInfo),
}

fn run_erased<S: FrameSystem>(system: &mut dyn Any, phase: Phase, frame: FrameInfo) {
    if let Some(system) = system.downcast_mut::<S>() {
        system.run_phase(phase, frame);
    }
}

/// Drives registered systems through the phases of each frame.
#[derive(Default)]
pub struct Scheduler {
    systems: Vec<Registered>,
    /// Indices into `systems`, per phase, in registration order.
    subscriptions: BTreeMap<Phase, Vec<usize>>,
    frame: u64,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system for the phases it declares.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateSystem`] if the name is taken.
    pub fn register<S: FrameSystem>(&mut self, system: S) -> Result<(), DuplicateSystem> {
        let name = system.name().to_string();
        if self.systems.iter().any(|r| r.name == name) {
            return Err(DuplicateSystem(name));
        }

        let mut phases = system.phases().to_vec();
        phases.sort();
        phases.dedup();

        debug!(system = %name, phases = phases.len(), "registered frame system");
        self.systems.push(Registered {
            name,
            phases,
            system: Box::new(system),
            run_fn: run_erased::<S>,
        });
        self.rebuild_subscriptions();
        Ok(())
    }

    /// Remove a system by name. Returns `true` if it was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        let Some(pos) = self.systems.iter().position(|r| r.name == name) else {
            return false;
        };
        self.systems.remove(pos);
        self.rebuild_subscriptions();
        debug!(system = name, "unregistered frame system");
        true
    }

    fn rebuild_subscriptions(&mut self) {
        self.subscriptions.clear();
        for (idx, registered) in self.systems.iter().enumerate() {
            for &phase in &registered.phases {
                self.subscriptions.entry(phase).or_default().push(idx);
            }
        }
    }

    /// Borrow a registered system by type.
    #[must_use]
    pub fn get<S: FrameSystem>(&self) -> Option<&S> {
        self.systems.iter().find_map(|r| r.system.downcast_ref::<S>())
    }

    /// Mutably borrow a registered system by type.
    #[must_use]
    pub fn get_mut<S: FrameSystem>(&mut self) -> Option<&mut S> {
        self.systems.iter_mut().find_map(|r| r.system.downcast_mut::<S>())
    }

    /// Names of the systems subscribed to a phase, in call order.
    #[must_use]
    pub fn subscribers(&self, phase: Phase) -> Vec<&str> {
        self.subscriptions
            .get(&phase)
            .map(|indices| indices.iter().map(|&i| self.systems[i].name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Run one frame: every phase in order, every subscriber in order.
    pub fn frame(&mut self, dt: f64) -> FrameInfo {
        self.frame += 1;
        let info = FrameInfo { frame: self.frame, dt };
        trace!(frame = info.frame, dt, "frame start");

        for phase in Phase::ALL {
            let Some(indices) = self.subscriptions.get(&phase) else {
                continue;
            };
            for &idx in indices {
                let registered = &mut self.systems[idx];
                (registered.run_fn)(registered.system.as_mut(), phase, info);
            }
        }
        info
    }

    /// Number of frames run so far.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Number of registered systems.
    #[must_use]
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("systems", &self.systems.iter().map(|r| &r.name).collect::<Vec<_>>())
            .field("frame", &self.frame)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    type Log = Rc<RefCell<Vec<(String, Phase)>>>;

    struct Recorder {
        name: String,
        phases: Vec<Phase>,
        log: Log,
        calls: usize,
    }

    impl Recorder {
        fn new(name: &str, phases: &[Phase], log: &Log) -> Self {
            Self {
                name: name.to_string(),
                phases: phases.to_vec(),
                log: Rc::clone(log),
                calls: 0,
            }
        }
    }

    impl FrameSystem for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn phases(&self) -> &[Phase] {
            &self.phases
        }

        fn run_phase(&mut self, phase: Phase, _frame: FrameInfo) {
            self.calls += 1;
            self.log.borrow_mut().push((self.name.clone(), phase));
        }
    }

    #[test]
    fn test_empty_scheduler_advances_frames() {
        let mut scheduler = Scheduler::new();
        assert_eq!(scheduler.frame(0.016).frame, 1);
        assert_eq!(scheduler.frame(0.016).frame, 2);
        assert_eq!(scheduler.frame_count(), 2);
    }

    #[test]
    fn test_phases_run_in_fixed_order_then_registration_order() {
        let log = Log::default();
        let mut scheduler = Scheduler::new();
        scheduler.register(Recorder::new("a", &Phase::ALL, &log)).unwrap();
        scheduler
            .register(Recorder::new("b", &[Phase::PostUpdate, Phase::Update], &log))
            .unwrap();

        scheduler.frame(0.016);

        let expected = vec![
            ("a".to_string(), Phase::FlushActivations),
            ("a".to_string(), Phase::Update),
            ("b".to_string(), Phase::Update),
            ("a".to_string(), Phase::FlushUserRequestedChanges),
            ("a".to_string(), Phase::PostUpdate),
            ("b".to_string(), Phase::PostUpdate),
            ("a".to_string(), Phase::FlushRetirements),
        ];
        assert_eq!(*log.borrow(), expected);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let log = Log::default();
        let mut scheduler = Scheduler::new();
        scheduler.register(Recorder::new("a", &Phase::ALL, &log)).unwrap();
        let err = scheduler.register(Recorder::new("a", &Phase::ALL, &log)).unwrap_err();
        assert_eq!(err, DuplicateSystem("a".into()));
        assert_eq!(scheduler.system_count(), 1);
    }

    #[test]
    fn test_unregister_stops_calls() {
        let log = Log::default();
        let mut scheduler = Scheduler::new();
        scheduler.register(Recorder::new("a", &[Phase::Update], &log)).unwrap();
        scheduler.register(Recorder::new("b", &[Phase::Update], &log)).unwrap();
        assert!(scheduler.unregister("a"));
        assert!(!scheduler.unregister("a"));
        assert_eq!(scheduler.subscribers(Phase::Update), vec!["b"]);

        scheduler.frame(0.016);
        assert_eq!(*log.borrow(), vec![("b".to_string(), Phase::Update)]);
    }

    #[test]
    fn test_get_mut_downcasts_to_concrete_system() {
        let log = Log::default();
        let mut scheduler = Scheduler::new();
        scheduler.register(Recorder::new("a", &[Phase::Update], &log)).unwrap();
        scheduler.frame(0.016);
        scheduler.frame(0.016);
        assert_eq!(scheduler.get::<Recorder>().map(|r| r.calls), Some(2));
        scheduler.get_mut::<Recorder>().unwrap().calls = 0;
        assert_eq!(scheduler.get::<Recorder>().map(|r| r.calls), Some(0));
    }
}
