use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use stateflow_core::{
    BuildError, CompileCache, CompileOptions, HandlerRegistry, MachineBuilder, StateKind,
    TracingSink, WorkflowDeclaration,
};
use tracing_subscriber::EnvFilter;

const BUILTIN_NAMES: &str = "identity, increment_value, stamp_time, log_event";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(declaration_path) = args.get(1).filter(|a| !a.starts_with("--")).cloned() else {
        eprintln!(
            "usage: stateflow <declaration.yaml> [--input <json|@file>] \
             [--cache-dir <dir>] [--allow-no-default] [--dry-run]"
        );
        std::process::exit(2);
    };

    let input = parse_input(&args)?;
    let cache_dir =
        flag_value(&args, "--cache-dir").unwrap_or_else(|| "conditions_cache".to_string());
    let allow_no_default = args.iter().any(|a| a == "--allow-no-default");
    let dry_run = args.iter().any(|a| a == "--dry-run");

    let text = std::fs::read_to_string(&declaration_path)
        .with_context(|| format!("reading {declaration_path}"))?;
    let declaration = WorkflowDeclaration::from_yaml(&text)?;

    let mut registry = HandlerRegistry::new();
    if dry_run {
        // Echo handlers for every task state: each tags the event with
        // its own name, so any declaration can be driven end to end to
        // inspect routing and timeouts without real task behavior.
        for machine in declaration.machines.values() {
            for state in machine.states.values() {
                if state.kind == StateKind::Task {
                    let marker = state.name.clone();
                    registry.register_fn(
                        &machine.lambda_dir,
                        &state.name,
                        move |mut event, _ctx| {
                            if let Value::Object(map) = &mut event {
                                map.insert(marker.clone(), json!("handled"));
                            }
                            Ok(event)
                        },
                    );
                }
            }
        }
    } else {
        // Task states resolve against the built-in handler table by
        // state name. Embedders with their own task behavior register
        // real handlers on a HandlerRegistry and drive the library
        // directly.
        for machine in declaration.machines.values() {
            register_builtins(&mut registry, &machine.lambda_dir);
        }
    }

    let cache = CompileCache::new(&cache_dir);
    let builder = MachineBuilder::new(&registry, &cache, Arc::new(TracingSink))
        .with_options(CompileOptions { allow_no_default });
    let machine = match builder.build(&declaration) {
        Ok(machine) => machine,
        Err(err @ BuildError::HandlerNotFound { .. }) if !dry_run => {
            eprintln!("{err}");
            eprintln!(
                "task state names must match a built-in handler ({BUILTIN_NAMES}); \
                 pass --dry-run to echo-run arbitrary declarations"
            );
            std::process::exit(1);
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!(
        machine = %machine.name(),
        id = %machine.id(),
        timeout_seconds = machine.timeout(),
        "machine built"
    );

    let output = machine.run(input).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

/// The handlers the binary ships with, resolved by task state name.
fn register_builtins(registry: &mut HandlerRegistry, dir: &str) {
    registry.register_fn(dir, "identity", |event, _ctx| Ok(event));

    registry.register_fn(dir, "increment_value", |mut event, _ctx| {
        if let Value::Object(map) = &mut event {
            let n = map.get("value").and_then(Value::as_i64).unwrap_or(0);
            map.insert("value".to_string(), json!(n + 1));
        }
        Ok(event)
    });

    registry.register_fn(dir, "stamp_time", |mut event, ctx| {
        if let Value::Object(map) = &mut event {
            map.insert("stamped_at_ms".to_string(), json!(ctx.timestamp_ms));
        }
        Ok(event)
    });

    registry.register_fn(dir, "log_event", |event, ctx| {
        tracing::info!(state = %ctx.state_name, %event, "event passed through");
        Ok(event)
    });
}

/// Value of `--flag <value>` if present.
fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
}

/// Parse `--input` as inline JSON, or as a file when prefixed with `@`.
/// Defaults to an empty object.
fn parse_input(args: &[String]) -> Result<Value> {
    match flag_value(args, "--input") {
        None => Ok(json!({})),
        Some(raw) => {
            if let Some(path) = raw.strip_prefix('@') {
                let text =
                    std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
                serde_json::from_str(&text).with_context(|| format!("parsing {path} as JSON"))
            } else {
                serde_json::from_str(&raw).context("parsing --input as JSON")
            }
        }
    }
}
