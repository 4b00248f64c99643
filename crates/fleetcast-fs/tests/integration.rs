use fleetcast_fs::{AtomicWriteOptions, Workspace, atomic_read, atomic_write, clear_dir, promote};
use tempfile::tempdir;

#[test]
fn test_stage_then_promote_into_cleared_project_dir() {
    let dir = tempdir().unwrap();
    let project = dir.path().join("node-1/app");
    std::fs::create_dir_all(project.join("lib")).unwrap();
    std::fs::write(project.join("lib/old.jar"), "old").unwrap();

    let workspace = Workspace::new(dir.path().join(".staging/session-1")).unwrap();
    let staged = workspace.file("app.jar");
    std::fs::write(&staged, "fresh build").unwrap();

    clear_dir(&project).unwrap();
    promote(&staged, project.join("app.jar")).unwrap();
    drop(workspace);

    assert_eq!(atomic_read(project.join("app.jar")).unwrap(), b"fresh build");
    assert!(!project.join("lib").exists());
    assert!(!dir.path().join(".staging/session-1").exists());
}

#[test]
fn test_atomic_write_marker() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join(".release.json");

    atomic_write(&marker, br#"{"job":"a"}"#, AtomicWriteOptions::new()).unwrap();
    atomic_write(&marker, br#"{"job":"b"}"#, AtomicWriteOptions::new()).unwrap();

    assert_eq!(atomic_read(&marker).unwrap(), br#"{"job":"b"}"#);
}

#[test]
fn test_promote_without_parent_fails() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("a");
    std::fs::write(&src, "x").unwrap();
    assert!(promote(&src, "/").is_err());
}
