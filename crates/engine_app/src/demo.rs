//! Built-in script modules used by the demo scene.

use std::time::Duration;

use anyhow::bail;
use engine_script::{
    AttributeDef, AttributeSchema, AttributeValue, ModuleDefinition, ModuleImplementation, ModuleRegistry, Script,
    ScriptContext,
};
use tracing::info;

/// Rotates at `speed` degrees per second and logs every full turn.
#[derive(Default)]
struct Spin {
    angle: f64,
    turns: u64,
}

impl Script for Spin {
    fn update(&mut self, ctx: &mut ScriptContext<'_>, dt: f64) -> anyhow::Result<()> {
        let speed = ctx.attributes().number("speed").unwrap_or_default();
        self.angle += speed * dt;
        Ok(())
    }

    fn post_update(&mut self, ctx: &mut ScriptContext<'_>, _dt: f64) -> anyhow::Result<()> {
        while self.angle >= 360.0 {
            self.angle -= 360.0;
            self.turns += 1;
            info!(entity = %ctx.entity(), turns = self.turns, "spin: full turn");
        }
        Ok(())
    }
}

/// Removes its entity's script component after `seconds`.
#[derive(Default)]
struct Lifetime {
    elapsed: f64,
}

impl Script for Lifetime {
    fn update(&mut self, ctx: &mut ScriptContext<'_>, dt: f64) -> anyhow::Result<()> {
        self.elapsed += dt;
        let seconds = ctx.attributes().number("seconds").unwrap_or_default();
        if self.elapsed >= seconds {
            info!(entity = %ctx.entity(), seconds, "lifetime: expired");
            ctx.remove_component();
        }
        Ok(())
    }

    fn destroy(&mut self, ctx: &mut ScriptContext<'_>) -> anyhow::Result<()> {
        info!(entity = %ctx.entity(), elapsed = self.elapsed, "lifetime: destroyed");
        Ok(())
    }
}

/// Attaches `module` (with the given `speed`) to its own entity, then
/// retires itself.
struct Spawner;

impl Script for Spawner {
    fn initialize(&mut self, ctx: &mut ScriptContext<'_>) -> anyhow::Result<()> {
        let module = ctx.attributes().string("module").unwrap_or_default().to_string();
        let speed = ctx.attributes().number("speed").unwrap_or_default();
        info!(entity = %ctx.entity(), module = %module, "spawner: attaching module");
        ctx.add_module(ModuleDefinition::new(module).with_attribute("speed", speed));
        Ok(())
    }

    fn update(&mut self, ctx: &mut ScriptContext<'_>, _dt: f64) -> anyhow::Result<()> {
        ctx.remove_self();
        Ok(())
    }
}

/// Counts its updates in the `ticks` attribute and fails once it reaches
/// `failAfter`.
struct Faulty;

impl Script for Faulty {
    fn update(&mut self, ctx: &mut ScriptContext<'_>, _dt: f64) -> anyhow::Result<()> {
        let ticks = ctx.attributes().number("ticks").unwrap_or_default() + 1.0;
        ctx.attributes_mut().set("ticks", AttributeValue::Number(ticks))?;
        let limit = ctx.attributes().number("failAfter").unwrap_or_default();
        if ticks >= limit {
            bail!("gave up after {ticks} updates");
        }
        Ok(())
    }
}

fn speed_schema() -> AttributeSchema {
    AttributeSchema::new().with("speed", AttributeDef::number(45.0))
}

/// Registry holding every demo module, resolving after `latency`.
pub fn registry(latency: Duration) -> ModuleRegistry {
    let registry = ModuleRegistry::new().with_latency(latency);
    registry.register(ModuleImplementation::new("spin.mjs", Spin::default).with_schema(speed_schema()));
    registry.register(
        ModuleImplementation::new("lifetime.mjs", Lifetime::default)
            .with_schema(AttributeSchema::new().with("seconds", AttributeDef::number(5.0))),
    );
    registry.register(
        ModuleImplementation::new("spawner.mjs", || Spawner).with_schema(
            speed_schema().with("module", AttributeDef::string("spin.mjs")),
        ),
    );
    registry.register(
        ModuleImplementation::new("faulty.mjs", || Faulty).with_schema(
            AttributeSchema::new()
                .with("failAfter", AttributeDef::number(3.0))
                .with("ticks", AttributeDef::number(0.0)),
        ),
    );
    registry
}
