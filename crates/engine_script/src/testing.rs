//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::attribute::{AttributeDef, AttributeSchema};
use crate::config::ScriptSystemConfig;
use crate::definition::ComponentConfig;
use crate::entity::{Entity, EntityAllocator};
use crate::error::{LoadError, ScriptError};
use crate::loader::{LoadResult, ModuleImplementation, ModuleLoader};
use crate::report::ErrorSink;
use crate::scheduler::FrameInfo;
use crate::script::{Hook, Script, ScriptContext};
use crate::system::ScriptSystem;

/// Shared, ordered record of hook calls: `"<specifier>:<hook>"`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub(crate) fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }

    pub(crate) fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

type Behavior = Arc<dyn Fn(Hook, &mut ScriptContext<'_>) -> anyhow::Result<()> + Send + Sync>;

struct TracedScript {
    trace: Trace,
    behavior: Option<Behavior>,
}

impl TracedScript {
    fn record(&self, hook: Hook, ctx: &mut ScriptContext<'_>) -> anyhow::Result<()> {
        self.trace.push(format!("{}:{hook}", ctx.specifier()));
        match &self.behavior {
            Some(behavior) => behavior(hook, ctx),
            None => Ok(()),
        }
    }
}

impl Script for TracedScript {
    fn initialize(&mut self, ctx: &mut ScriptContext<'_>) -> anyhow::Result<()> {
        self.record(Hook::Initialize, ctx)
    }

    fn post_initialize(&mut self, ctx: &mut ScriptContext<'_>) -> anyhow::Result<()> {
        self.record(Hook::PostInitialize, ctx)
    }

    fn update(&mut self, ctx: &mut ScriptContext<'_>, _dt: f64) -> anyhow::Result<()> {
        self.record(Hook::Update, ctx)
    }

    fn post_update(&mut self, ctx: &mut ScriptContext<'_>, _dt: f64) -> anyhow::Result<()> {
        self.record(Hook::PostUpdate, ctx)
    }

    fn destroy(&mut self, ctx: &mut ScriptContext<'_>) -> anyhow::Result<()> {
        self.record(Hook::Destroy, ctx)
    }
}

fn traced_schema() -> AttributeSchema {
    AttributeSchema::new()
        .with("speed", AttributeDef::number(1.0))
        .with("target", AttributeDef::entity())
}

/// A module that records every hook call into `trace`. Declares a `speed`
/// number (default 1) and a `target` entity.
pub(crate) fn traced(specifier: &str, trace: &Trace) -> ModuleImplementation {
    let trace = trace.clone();
    ModuleImplementation::new(specifier, move || TracedScript {
        trace: trace.clone(),
        behavior: None,
    })
    .with_schema(traced_schema())
}

/// Like [`traced`], then runs `behavior` after recording each call.
pub(crate) fn traced_with<F>(specifier: &str, trace: &Trace, behavior: F) -> ModuleImplementation
where
    F: Fn(Hook, &mut ScriptContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    let trace = trace.clone();
    let behavior: Behavior = Arc::new(behavior);
    ModuleImplementation::new(specifier, move || TracedScript {
        trace: trace.clone(),
        behavior: Some(Arc::clone(&behavior)),
    })
    .with_schema(traced_schema())
}

fn crash(specifier: &str) -> LoadResult {
    panic!("loader crashed resolving {specifier}")
}

/// Loader double: counts resolves per specifier; gated specifiers wait
/// until the test releases or fails them.
#[derive(Default)]
pub(crate) struct TestLoader {
    modules: Mutex<HashMap<String, Arc<ModuleImplementation>>>,
    gated: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    waiting: Mutex<Vec<(String, oneshot::Sender<LoadResult>)>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl TestLoader {
    pub(crate) fn register(&self, implementation: ModuleImplementation) {
        self.modules
            .lock()
            .unwrap()
            .insert(implementation.specifier().to_string(), Arc::new(implementation));
    }

    pub(crate) fn gate(&self, specifier: &str) {
        self.gated.lock().unwrap().insert(specifier.to_string());
    }

    /// Make every later resolve of `specifier` panic when polled.
    pub(crate) fn panic_on(&self, specifier: &str) {
        self.panicking.lock().unwrap().insert(specifier.to_string());
    }

    fn lookup(&self, specifier: &str) -> LoadResult {
        self.modules
            .lock()
            .unwrap()
            .get(specifier)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(specifier.to_string()))
    }

    fn take_waiter(&self, specifier: &str) -> Option<oneshot::Sender<LoadResult>> {
        let mut waiting = self.waiting.lock().unwrap();
        let pos = waiting.iter().position(|(s, _)| s == specifier)?;
        Some(waiting.remove(pos).1)
    }

    /// Complete the oldest gated resolve of `specifier` from the registry.
    pub(crate) fn release(&self, specifier: &str) -> bool {
        let result = self.lookup(specifier);
        self.take_waiter(specifier).is_some_and(|tx| tx.send(result).is_ok())
    }

    /// Fail the oldest gated resolve of `specifier`.
    pub(crate) fn fail(&self, specifier: &str, reason: &str) -> bool {
        let err = LoadError::Failed {
            specifier: specifier.to_string(),
            reason: reason.to_string(),
        };
        self.take_waiter(specifier).is_some_and(|tx| tx.send(Err(err)).is_ok())
    }

    pub(crate) fn calls(&self, specifier: &str) -> usize {
        self.calls.lock().unwrap().get(specifier).copied().unwrap_or(0)
    }
}

impl ModuleLoader for TestLoader {
    fn resolve(&self, specifier: &str) -> BoxFuture<'static, LoadResult> {
        *self.calls.lock().unwrap().entry(specifier.to_string()).or_default() += 1;

        if self.panicking.lock().unwrap().contains(specifier) {
            let specifier = specifier.to_string();
            return async move { crash(&specifier) }.boxed();
        }

        if !self.gated.lock().unwrap().contains(specifier) {
            return futures::future::ready(self.lookup(specifier)).boxed();
        }

        let (tx, rx) = oneshot::channel();
        self.waiting.lock().unwrap().push((specifier.to_string(), tx));
        let specifier = specifier.to_string();
        async move { rx.await.unwrap_or(Err(LoadError::Abandoned(specifier))) }.boxed()
    }
}

/// Error sink that keeps every report.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingSink(Arc<Mutex<Vec<ScriptError>>>);

impl RecordingSink {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(ToString::to_string).collect()
    }

    pub(crate) fn take(&self) -> Vec<ScriptError> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl ErrorSink for RecordingSink {
    fn report(&mut self, error: ScriptError) {
        self.0.lock().unwrap().push(error);
    }
}

/// A script system wired to the doubles above. Must be created inside a
/// tokio runtime.
pub(crate) struct Harness {
    pub(crate) system: ScriptSystem,
    pub(crate) loader: Arc<TestLoader>,
    pub(crate) trace: Trace,
    pub(crate) sink: RecordingSink,
    pub(crate) entities: EntityAllocator,
    frame: u64,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_config(ScriptSystemConfig::default())
    }

    pub(crate) fn with_config(config: ScriptSystemConfig) -> Self {
        let loader = Arc::new(TestLoader::default());
        let sink = RecordingSink::default();
        let system = ScriptSystem::new(config, loader.clone(), Handle::current()).with_sink(sink.clone());
        Self {
            system,
            loader,
            trace: Trace::default(),
            sink,
            entities: EntityAllocator::new(),
            frame: 0,
        }
    }

    /// Allocate an entity and give it a script component.
    pub(crate) fn spawn(&mut self, config: ComponentConfig) -> Entity {
        let entity = self.entities.allocate();
        self.system.add_component(entity, config).unwrap();
        entity
    }

    /// Let spawned load tasks run and post their completions.
    pub(crate) async fn settle(&self) {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    /// Run one full frame at 60 Hz.
    pub(crate) fn frame(&mut self) {
        self.frame += 1;
        self.system.frame(FrameInfo {
            frame: self.frame,
            dt: 1.0 / 60.0,
        });
    }
}
