//! Build script for realtime-link
//!
//! Embeds the git revision, build time, target and compiler version so that
//! `realtime-link version` can report exactly what is running.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let revision = git(&["rev-parse", "--short=8", "HEAD"]);
    let branch = git(&["rev-parse", "--abbrev-ref", "HEAD"]);
    let dirty = match Command::new("git").args(["status", "--porcelain"]).output() {
        Ok(out) if out.status.success() => (!out.stdout.is_empty()).to_string(),
        _ => "unknown".to_string(),
    };

    let built_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let rustc = capture("rustc", &["--version"]);

    emit("REALTIME_LINK_GIT_HASH", &revision);
    emit("REALTIME_LINK_GIT_BRANCH", &branch);
    emit("REALTIME_LINK_GIT_DIRTY", &dirty);
    emit("REALTIME_LINK_BUILD_TIMESTAMP", &built_at);
    emit("REALTIME_LINK_TARGET", &env_or_unknown("TARGET"));
    emit("REALTIME_LINK_PROFILE", &env_or_unknown("PROFILE"));
    emit("REALTIME_LINK_HOST", &env_or_unknown("HOST"));
    emit("REALTIME_LINK_RUSTC_VERSION", &rustc);
}

fn emit(key: &str, value: &str) {
    println!("cargo:rustc-env={}={}", key, value);
}

fn env_or_unknown(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| "unknown".to_string())
}

fn git(args: &[&str]) -> String {
    capture("git", args)
}

/// Run a command and return its trimmed stdout, or "unknown" on any failure
fn capture(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
