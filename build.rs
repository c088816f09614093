//! Build script for the Atom worker
//!
//! Embeds build metadata (git revision, timestamp, target, toolchain) as
//! `ATOM_*` compile-time environment variables read by `src/version.rs`.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = command_output("git", &["rev-parse", "--short=8", "HEAD"]);
    let git_branch = command_output("git", &["rev-parse", "--abbrev-ref", "HEAD"]);
    let git_dirty = git_dirty_flag();
    let rustc_version = command_output("rustc", &["--version"]);

    let build_timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let target = env_or_unknown("TARGET");
    let profile = env_or_unknown("PROFILE");
    let host = env_or_unknown("HOST");

    let vars = [
        ("ATOM_GIT_HASH", git_hash.as_str()),
        ("ATOM_GIT_BRANCH", git_branch.as_str()),
        ("ATOM_GIT_DIRTY", git_dirty),
        ("ATOM_BUILD_TIMESTAMP", build_timestamp.as_str()),
        ("ATOM_TARGET", target.as_str()),
        ("ATOM_PROFILE", profile.as_str()),
        ("ATOM_RUSTC_VERSION", rustc_version.as_str()),
        ("ATOM_HOST", host.as_str()),
    ];
    for (key, value) in vars {
        println!("cargo:rustc-env={}={}", key, value);
    }
}

fn env_or_unknown(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| "unknown".to_string())
}

/// Run a command and return its trimmed stdout, or "unknown"
fn command_output(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn git_dirty_flag() -> &'static str {
    match Command::new("git").args(["status", "--porcelain"]).output() {
        Ok(output) if output.status.success() => {
            if output.stdout.is_empty() {
                "false"
            } else {
                "true"
            }
        }
        _ => "unknown",
    }
}
