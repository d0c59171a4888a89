use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::{Command, Stdio};

#[derive(Parser)]
#[command(author, version, about = "Workspace automation tasks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// fmt + clippy -D warnings + tests + config check (workspace)
    Ci,
    /// Load and validate data/config/*.toml
    CheckConfig,
}

fn run(cmd: &mut Command) -> Result<()> {
    let status = cmd.status().context("spawn")?;
    if !status.success() {
        bail!("command failed: {:?}", cmd);
    }
    Ok(())
}

fn cargo(args: &[&str]) -> Result<()> {
    let mut c = Command::new("cargo");
    c.args(args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    run(&mut c)
}

fn ci() -> Result<()> {
    cargo(&["fmt", "--all", "--", "--check"])?;
    cargo(&["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
    cargo_deny()?;
    cargo(&["test", "--workspace"])?;
    check_config()?;
    Ok(())
}

fn cargo_deny() -> Result<()> {
    // Run `cargo deny check` if installed; otherwise warn and continue.
    let mut cmd = Command::new("cargo");
    cmd.args(["deny", "check"]).stdout(Stdio::inherit()).stderr(Stdio::inherit());
    match cmd.status() {
        Ok(status) => {
            if !status.success() {
                bail!("cargo deny check failed");
            }
        }
        Err(e) => {
            eprintln!("xtask: cargo-deny not found or failed to launch: {} (skipping)", e);
        }
    }
    Ok(())
}

fn check_config() -> Result<()> {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..");
    let server_path = root.join("data/config/server.toml");
    if server_path.is_file() {
        let cfg = data_runtime::configs::server::load_from(&server_path)
            .with_context(|| format!("validate {}", server_path.display()))?;
        let chunks: Vec<u32> = cfg
            .world
            .size
            .iter()
            .zip(cfg.world.chunk)
            .map(|(s, c)| s.div_ceil(c))
            .collect();
        println!(
            "xtask: server.toml OK ({} ms ticks, {:?} chunks, bind {})",
            cfg.tick_ms, chunks, cfg.net.bind_addr
        );
    } else {
        println!("xtask: no server.toml; defaults apply");
    }
    let tcfg = data_runtime::configs::telemetry::load_default().context("validate telemetry.toml")?;
    println!("xtask: telemetry OK (level {:?})", tcfg.log_level);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Ci => ci(),
        Cmd::CheckConfig => check_config(),
    }
}
