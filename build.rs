use std::process::Command;

/// `git describe` output for the working tree, e.g. `a1b2c3d-dirty`
fn describe_tree() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=7"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim();
    (!described.is_empty()).then(|| described.to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=PROFILE");

    let version = env!("CARGO_PKG_VERSION");
    let profile = std::env::var("PROFILE").unwrap_or_default();

    // Release builds report the bare package version
    let version_string = match profile.as_str() {
        "release" => version.to_string(),
        _ => format!(
            "{} ({})",
            version,
            describe_tree().unwrap_or_else(|| "unknown".to_string())
        ),
    };

    println!("cargo:rustc-env=VERSION_STRING={}", version_string);
}
