use std::env;
use std::process::Command;

const COMMIT_ENV: &str = "RELEASE_LOADER_GIT_COMMIT_HASH";

fn main() {
    for watched in ["migrations", ".git/HEAD", ".git/refs/heads"] {
        println!("cargo:rerun-if-changed={watched}");
    }
    println!("cargo:rerun-if-env-changed=SOURCE_COMMIT_HASH");

    let commit = env::var("SOURCE_COMMIT_HASH")
        .ok()
        .filter(|hash| !hash.trim().is_empty())
        .or_else(git_head)
        .unwrap_or_else(|| String::from("unknown"));

    println!("cargo:rustc-env={COMMIT_ENV}={commit}");
}

/// `None` outside a checkout or when git is missing.
fn git_head() -> Option<String> {
    let output = Command::new("git").args(["rev-parse", "HEAD"]).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).trim().to_owned())
        .filter(|hash| !hash.is_empty())
}
