//! Filesystem provisioning integration tests
//!
//! Exercises skeleton copying, hook execution and environment patching
//! against real temporary directories.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;
use user_managerd::config::Settings;
use user_managerd::environment;
use user_managerd::homes;
use user_managerd::manager;

fn current_ids() -> (u32, u32) {
    unsafe { (libc::geteuid(), libc::getegid()) }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[test]
fn skeleton_copy_includes_hidden_files_and_subdirectories() {
    let dir = TempDir::new().unwrap();
    let skel = dir.path().join("skel");
    let home = dir.path().join("home/alice");
    fs::create_dir_all(skel.join(".config/nested")).unwrap();
    fs::write(skel.join(".profile"), "export PATH\n").unwrap();
    fs::write(skel.join(".config/nested/settings.ini"), "[ui]\n").unwrap();
    fs::write(skel.join("readme.txt"), "hello\n").unwrap();
    fs::create_dir_all(home.parent().unwrap()).unwrap();

    // Chown to our own ids works unprivileged.
    let (uid, gid) = current_ids();
    homes::copy_tree(&skel, &home, uid, gid).unwrap();

    assert!(home.join(".profile").exists());
    assert!(home.join(".config/nested/settings.ini").exists());
    assert!(home.join("readme.txt").exists());
}

#[test]
fn copy_tree_is_idempotent_for_existing_directories() {
    let dir = TempDir::new().unwrap();
    let skel = dir.path().join("skel");
    let home = dir.path().join("home");
    fs::create_dir_all(&skel).unwrap();
    fs::write(skel.join("file"), "x").unwrap();
    fs::create_dir_all(&home).unwrap();

    let (uid, gid) = current_ids();
    homes::copy_tree(&skel, &home, uid, gid).unwrap();
    assert!(home.join("file").exists());
}

#[test]
fn remove_tree_deletes_recursively() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("victim");
    fs::create_dir_all(target.join("deep/deeper")).unwrap();
    fs::write(target.join("deep/file"), "x").unwrap();

    homes::remove_tree(&target).unwrap();
    assert!(!target.exists());

    // A missing tree is an error.
    assert!(homes::remove_tree(&target).is_err());
}

#[test]
fn hooks_run_in_natural_order_with_the_uid_argument() {
    let dir = TempDir::new().unwrap();
    let hooks = dir.path().join("create.d");
    fs::create_dir_all(&hooks).unwrap();
    let log = dir.path().join("order.log");

    for name in ["9-second.sh", "10-third.sh", "1-first.sh"] {
        write_script(
            &hooks.join(name),
            &format!("#!/bin/sh\necho \"{name} $1\" >> {}\n", log.display()),
        );
    }
    // Not executable, must be skipped.
    fs::write(hooks.join("5-skipped.sh"), "#!/bin/sh\nexit 1\n").unwrap();
    // Wrong suffix, must be skipped.
    write_script(&hooks.join("2-wrong.txt"), "#!/bin/sh\nexit 1\n");

    homes::execute_hooks(100001, &hooks);

    let log = fs::read_to_string(&log).unwrap();
    assert_eq!(
        log.lines().collect::<Vec<_>>(),
        vec![
            "1-first.sh 100001",
            "9-second.sh 100001",
            "10-third.sh 100001"
        ]
    );
}

#[test]
fn failing_hooks_do_not_stop_the_rest() {
    let dir = TempDir::new().unwrap();
    let hooks = dir.path().join("remove.d");
    fs::create_dir_all(&hooks).unwrap();
    let marker = dir.path().join("ran");

    write_script(&hooks.join("1-fails.sh"), "#!/bin/sh\nexit 7\n");
    write_script(
        &hooks.join("2-runs.sh"),
        &format!("#!/bin/sh\ntouch {}\n", marker.display()),
    );

    homes::execute_hooks(100001, &hooks);
    assert!(marker.exists());
}

#[test]
fn missing_hook_directory_is_fine() {
    let dir = TempDir::new().unwrap();
    homes::execute_hooks(100001, &dir.path().join("nope"));
}

#[test]
fn environment_patch_survives_a_switch_round_trip() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("environment");
    fs::write(&file, "FOO=1\nLAST_LOGIN_UID=100000\nBAR=2\n").unwrap();

    environment::set_last_login_uid(&file, 100001);
    assert_eq!(
        fs::read_to_string(&file).unwrap(),
        "FOO=1\nLAST_LOGIN_UID=100001\nBAR=2\n"
    );

    environment::set_last_login_uid(&file, 100000);
    assert_eq!(
        fs::read_to_string(&file).unwrap(),
        "FOO=1\nLAST_LOGIN_UID=100000\nBAR=2\n"
    );
}

#[test]
fn remove_user_files_clears_environment_dir_and_runs_hooks() {
    let dir = TempDir::new().unwrap();
    let settings = Settings {
        user_environment_dir: dir.path().join("env"),
        remove_script_dir: dir.path().join("remove.d"),
        ..Settings::default()
    };
    let env_dir = settings.user_environment_path(100001);
    fs::create_dir_all(&env_dir).unwrap();
    fs::write(env_dir.join("state"), "x").unwrap();
    fs::create_dir_all(&settings.remove_script_dir).unwrap();
    let marker = dir.path().join("hook-ran");
    write_script(
        &settings.remove_script_dir.join("1-mark.sh"),
        &format!("#!/bin/sh\necho \"$1\" > {}\n", marker.display()),
    );

    assert!(manager::remove_user_files(&settings, 100001));
    assert!(!env_dir.exists());
    assert_eq!(fs::read_to_string(&marker).unwrap().trim(), "100001");

    // Removing again is still a success with no directory left.
    assert!(manager::remove_user_files(&settings, 100001));
}
