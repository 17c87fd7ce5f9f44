//! Heartbeat Example
//!
//! A timer drives a counter, the counter feeds a printer, and the program
//! stops at its execution timeout. Pass a RON file to override the default
//! configuration:
//!
//! ```text
//! cargo run -p heartbeat -- heartbeat.ron
//! RUST_LOG=tagflow_core=debug cargo run -p heartbeat
//! ```
//!
//! ```ron
//! (execution_timeout: Some((secs: 3, nanos: 0)), fast: true)
//! ```

use std::time::Duration;
use tagflow_core::{App, AppConfig, InputPort, OutputPort, ReactorBuilder, Result, Value};
use tracing_subscriber::EnvFilter;

/// Emits the number of beats seen so far on every timer tick
fn counter(parent: &mut ReactorBuilder<'_>, period: Duration) -> Result<OutputPort> {
    parent.child("counter", |c| {
        let beats = c.output("beats");
        let w = c.writable(&beats)?;
        let pulse = c.timer("pulse", Duration::ZERO, period);
        let mut count = 0i64;
        c.reaction().named("count").trigger(&pulse).effect(&w).body(move |ctx| {
            count += 1;
            ctx.set(&w, count)
        })?;
        Ok(beats)
    })
}

/// Prints each received beat with its logical time
fn printer(parent: &mut ReactorBuilder<'_>) -> Result<InputPort> {
    parent.child("printer", |p| {
        let beats = p.input("beats");
        let stop = p.shutdown();
        p.reaction().named("print").trigger(&beats).body(move |ctx| {
            let count = ctx.get(&beats).and_then(Value::as_int).unwrap_or_default();
            println!(
                "  beat {:>3} at {:>6.3}s",
                count,
                ctx.elapsed_logical_time().as_secs_f64()
            );
            Ok(())
        })?;
        p.reaction().named("farewell").trigger(&stop).body(|ctx| {
            println!("\nStopped at tag {}", ctx.current_tag());
            Ok(())
        })?;
        Ok(beats)
    })
}

fn load_config() -> std::result::Result<AppConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let source = std::fs::read_to_string(&path)?;
            Ok(AppConfig::from_ron(&source)?)
        }
        None => Ok(AppConfig::default()
            .with_execution_timeout(Duration::from_secs(5))
            .with_fast(true)),
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Tagflow Heartbeat Example ===\n");

    let config = load_config()?;
    let mut app = App::new(config);
    {
        let mut root = app.root()?;
        let beats_out = counter(&mut root, Duration::from_secs(1))?;
        let beats_in = printer(&mut root)?;
        root.connect(&beats_out, &beats_in)?;
    }

    app.on_success(|| println!("Execution finished successfully"));
    app.on_failure(|err| eprintln!("Execution failed: {err}"));

    println!("Precedence graph:\n{}", app.precedence_graph_dot());
    let outcome = app.run()?;
    tracing::info!(?outcome, "heartbeat done");
    Ok(())
}
