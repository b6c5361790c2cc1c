use std::fs;

use cluster::hosts::{HOSTFILE_NAME, write_hostfile};

#[test]
fn hostfile_has_one_host_per_line_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_hostfile(dir.path(), &["x", "y", "z"]).unwrap();

    assert_eq!(path, dir.path().join(HOSTFILE_NAME));
    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(content, "x\ny\nz");
    assert_eq!(content.matches('\n').count(), 2);
}

#[test]
fn hostfile_is_overwritten_not_appended() {
    let dir = tempfile::tempdir().unwrap();
    write_hostfile(dir.path(), &["algo-1", "algo-2", "algo-3"]).unwrap();
    let path = write_hostfile(dir.path(), &["algo-9"]).unwrap();

    assert_eq!(fs::read_to_string(path).unwrap(), "algo-9");
}

#[test]
fn unwritable_dir_fails() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");

    let err = write_hostfile(&missing, &["a"]).unwrap_err();
    assert!(matches!(err, cluster::LaunchError::Io(_)));
}
