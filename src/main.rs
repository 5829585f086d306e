//! Hive - 处理器编排核心
//!
//! 入口：`hive check [--config FILE]` 加载描述符与流程定义并逐个干跑检查；
//! `hive schema` 输出 handler.toml 的 JSON Schema。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hive::config::load_config;
use hive::invocation::{HandlerSet, InvocationBoundary};
use hive::registry::{descriptor_file_schema_json, DescriptorLoader, HandlerRegistry};
use hive::resolver::Resolver;
use hive::workflow::{ProcessExecutor, ProcessLoader};

const USAGE: &str = "usage: hive check [--config FILE] | hive schema";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("check") => {
            let config_path = parse_config_flag(&args[1..])?;
            let problems = check(config_path)?;
            if problems > 0 {
                anyhow::bail!("{problems} problem(s) found");
            }
            Ok(())
        }
        Some("schema") => {
            println!("{}", descriptor_file_schema_json());
            Ok(())
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

fn parse_config_flag(args: &[String]) -> anyhow::Result<Option<PathBuf>> {
    match args {
        [] => Ok(None),
        [flag, path] if flag == "--config" => Ok(Some(PathBuf::from(path))),
        _ => anyhow::bail!("{USAGE}"),
    }
}

/// 加载并干跑检查全部流程，返回问题数
fn check(config_path: Option<PathBuf>) -> anyhow::Result<usize> {
    let config = load_config(config_path).context("Failed to load config")?;

    let registry = Arc::new(HandlerRegistry::new());
    let count = DescriptorLoader::new(&config.app.descriptors_dir)
        .register_all(&registry)
        .context("Failed to load handler descriptors")?;
    println!("{count} handler(s) registered from {}", config.app.descriptors_dir.display());
    for descriptor in registry.snapshot().iter() {
        println!("  {}", descriptor.summary());
    }

    let processes = ProcessLoader::new(&config.app.processes_dir)
        .load_all()
        .context("Failed to load process definitions")?;

    let executor = ProcessExecutor::new(
        Resolver::new(Arc::clone(&registry)),
        InvocationBoundary::new(Arc::new(HandlerSet::new())),
    )
    .with_config(&config);
    if let Some(path) = config.snapshot.enabled.then_some(&config.snapshot.path) {
        println!("step snapshots -> {}", path.display());
    }

    let mut problems = 0;
    for process in &processes {
        match executor.check(process) {
            Err(err) => {
                problems += 1;
                println!("✗ {}: {err}", process.id);
            }
            Ok(steps) => {
                let failures: Vec<String> = steps
                    .iter()
                    .filter_map(|s| {
                        s.resolution
                            .as_ref()
                            .err()
                            .map(|e| format!("    {}: {e}", s.step_id))
                    })
                    .collect();
                if failures.is_empty() {
                    println!("✓ {} ({} steps)", process.id, steps.len());
                } else {
                    problems += failures.len();
                    println!("✗ {}", process.id);
                    for line in failures {
                        println!("{line}");
                    }
                }
            }
        }
    }
    Ok(problems)
}
