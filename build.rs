use std::process::Command;

fn main() {
    // Prefer values injected by the image build; fall back to local git state.
    let version = std::env::var("BUILD_VERSION")
        .ok()
        .or_else(git_describe)
        .unwrap_or_else(|| "unknown".to_string());

    let datetime = std::env::var("BUILD_DATETIME")
        .unwrap_or_else(|_| chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());

    println!("cargo:rustc-env=JWKER_BUILD_VERSION={version}");
    println!("cargo:rustc-env=JWKER_BUILD_DATETIME={datetime}");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=BUILD_VERSION");
    println!("cargo:rerun-if-env-changed=BUILD_DATETIME");
}

fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim();
    (!described.is_empty()).then(|| described.to_string())
}
