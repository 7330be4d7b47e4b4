//! Git fixtures shared by unit and integration tests.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Run git in `dir` and return trimmed stdout. Panics on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("git should be on PATH");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_owned()
}

/// Bare repository with one commit on `main`. Returns its `file://` URL
/// and path.
pub fn seeded_remote(root: &Path) -> (String, PathBuf) {
    let bare = root.join("remote.git");
    std::fs::create_dir_all(&bare).unwrap();
    git(&bare, &["init", "--bare", "--quiet"]);
    git(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"]);

    let seed = root.join("seed");
    std::fs::create_dir_all(&seed).unwrap();
    git(&seed, &["init", "--quiet"]);
    std::fs::write(seed.join("README.md"), "# jobs\n").unwrap();
    git(&seed, &["add", "README.md"]);
    git(
        &seed,
        &[
            "-c",
            "user.name=seed",
            "-c",
            "user.email=seed@localhost",
            "commit",
            "--quiet",
            "-m",
            "init",
        ],
    );
    git(
        &seed,
        &["push", "--quiet", bare.to_str().unwrap(), "HEAD:refs/heads/main"],
    );

    (format!("file://{}", bare.display()), bare)
}

pub fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).map_or(true, |mut entries| entries.next().is_none())
}
