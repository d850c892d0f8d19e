//! Build script for SignalHub
//!
//! Embeds the git commit, build timestamp, target triple and profile
//! into the binary so `signalhub version` and `/info` can report them.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    let git_hash = git_output(&["rev-parse", "--short=8", "HEAD"]);
    let build_timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=SIGNALHUB_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=SIGNALHUB_BUILD_TIMESTAMP={}", build_timestamp);
    println!("cargo:rustc-env=SIGNALHUB_TARGET={}", target);
    println!("cargo:rustc-env=SIGNALHUB_PROFILE={}", profile);
}

/// Run a git command and return its trimmed stdout, or "unknown"
fn git_output(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout).ok()
            } else {
                None
            }
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
