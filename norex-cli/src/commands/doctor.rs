use std::path::Path;
use std::process::Command;

use norex_core::config::NorexConfig;

#[derive(Debug)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub hint: Option<String>,
}

impl Check {
    fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            hint: None,
        }
    }

    fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            hint: None,
        }
    }

    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Print the environment report; returns whether every check passed
pub fn run_doctor(config_path: Option<&Path>, config: &NorexConfig, project_root: &Path) -> bool {
    println!("Norex Doctor\n");

    let mut failed = 0;

    println!("Environment:");
    for check in [check_docker(), check_compose()] {
        print_check(&check);
        failed += usize::from(!check.passed);
    }
    println!();

    match config_path {
        Some(path) => println!("Configuration: {}", path.display()),
        None => println!("Configuration: not found, using the built-in stack"),
    }
    println!();

    println!("Project: {}", project_root.display());
    for check in project_checks(config, project_root) {
        print_check(&check);
        failed += usize::from(!check.passed);
    }
    println!();

    println!("Services:");
    for check in service_checks(config) {
        print_check(&check);
        failed += usize::from(!check.passed);
    }
    println!();

    if failed == 0 {
        println!("All checks passed!");
    } else {
        println!("{} check(s) failed", failed);
    }
    failed == 0
}

fn print_check(check: &Check) {
    for line in render_check(check) {
        println!("{}", line);
    }
}

fn render_check(check: &Check) -> Vec<String> {
    let (tag, color) = if check.passed {
        (" ok ", "\x1b[32m")
    } else {
        ("FAIL", "\x1b[31m")
    };
    let mut lines = vec![format!(
        "  [{}{}\x1b[0m] {:<14} {}",
        color, tag, check.name, check.message
    )];
    if let Some(hint) = &check.hint {
        lines.push(format!("         hint: {}", hint));
    }
    lines
}

fn docker_stdout(args: &[&str]) -> Option<String> {
    let output = Command::new("docker").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// The engine `docker compose ps` will query: active context and server version
fn check_docker() -> Check {
    let context = docker_stdout(&["context", "show"]);
    match Command::new("docker")
        .args(["info", "--format", "{{.ServerVersion}}"])
        .output()
    {
        Ok(output) => engine_check(
            context.as_deref(),
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ),
        Err(_) => Check::fail("docker", "CLI not found on PATH")
            .with_hint("Install Docker Engine or Docker Desktop"),
    }
}

fn engine_check(context: Option<&str>, reachable: bool, server_version: &str, stderr: &str) -> Check {
    let context = context.unwrap_or("default");
    let server_version = server_version.trim();

    if reachable && !server_version.is_empty() {
        return Check::ok(
            "docker",
            format!("engine {} via context '{}'", server_version, context),
        );
    }

    let check = Check::fail("docker", format!("no engine behind context '{}'", context));
    let reason = stderr.lines().map(str::trim).find(|l| !l.is_empty());
    match (context, reason) {
        ("default", Some(reason)) => check.with_hint(reason.to_string()),
        ("default", None) => check.with_hint("Start the Docker daemon"),
        (other, _) => check.with_hint(format!(
            "Start the engine for '{}', or switch with `docker context use default`",
            other
        )),
    }
}

fn check_compose() -> Check {
    match Command::new("docker").args(["compose", "version", "--short"]).output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Check::ok("compose", format!("v{}", version.trim_start_matches('v')))
        }
        _ => Check::fail("compose", "`docker compose` unavailable")
            .with_hint("Install the Docker Compose plugin"),
    }
}

fn project_checks(config: &NorexConfig, project_root: &Path) -> Vec<Check> {
    let mut checks = Vec::new();

    for (name, script) in [
        ("start script", &config.scripts.start),
        ("stop script", &config.scripts.stop),
        ("status script", &config.scripts.status),
    ] {
        if project_root.join(script).is_file() {
            checks.push(Check::ok(name, script.as_str()));
        } else {
            checks.push(
                Check::fail(name, format!("{} not found", script))
                    .with_hint("Run norex from the project directory or set project_root"),
            );
        }
    }

    let logs = config.logs_dir(project_root);
    if logs.is_dir() {
        checks.push(Check::ok("logs", logs.display().to_string()));
    } else {
        // Created on first write
        checks.push(Check::ok("logs", format!("{} (not created yet)", logs.display())));
    }

    let www = project_root.join("www");
    if www.is_dir() {
        checks.push(Check::ok("www", www.display().to_string()));
    } else {
        checks.push(Check::fail("www", "folder not found"));
    }

    checks
}

fn service_checks(config: &NorexConfig) -> Vec<Check> {
    match config.registry() {
        Ok(registry) => registry
            .iter()
            .map(|svc| {
                let port = svc
                    .port
                    .as_ref()
                    .map(|p| format!(" :{}", p))
                    .unwrap_or_default();
                Check::ok(&svc.id, format!("{} ({}){}", svc.display_name, svc.runtime_ref, port))
            })
            .collect(),
        Err(e) => vec![Check::fail("services", e.to_string())],
    }
}
