use std::path::Path;
use std::time::{Duration, Instant};

use gridsaver::error::SaverError;
use gridsaver::gfx::Supervise as _;
use gridsaver::gfx::supervisor::{LaunchMode, PidChannel, ProcessSupervisor};

fn sh_available() -> bool {
    Path::new("/bin/sh").exists()
}

#[test]
fn direct_launch_observe_and_terminate() {
    if !sh_available() {
        eprintln!("skipping: /bin/sh not found");
        return;
    }

    let td = tempfile::tempdir().expect("tempdir");
    let sup = ProcessSupervisor::new(LaunchMode::Direct);
    sup.launch(
        td.path(),
        Path::new("/bin/sh"),
        &["-c".to_owned(), "sleep 30".to_owned()],
    )
    .expect("launch");

    assert!(sup.is_active());
    assert!(sup.current_pid().is_some());
    assert_eq!(sup.has_exited(), None);

    sup.terminate().expect("terminate");
    assert!(!sup.is_active());
    assert_eq!(sup.current_pid(), None);
}

#[test]
fn direct_exit_code_is_observed() {
    if !sh_available() {
        eprintln!("skipping: /bin/sh not found");
        return;
    }

    let td = tempfile::tempdir().expect("tempdir");
    let sup = ProcessSupervisor::new(LaunchMode::Direct);
    sup.launch(
        td.path(),
        Path::new("/bin/sh"),
        &["-c".to_owned(), "exit 7".to_owned()],
    )
    .expect("launch");

    let deadline = Instant::now() + Duration::from_secs(5);
    let code = loop {
        if let Some(code) = sup.has_exited() {
            break code;
        }
        assert!(Instant::now() < deadline, "child never exited");
        std::thread::sleep(Duration::from_millis(10));
    };
    assert_eq!(code, 7);

    sup.clear();
    assert!(!sup.is_active());
}

#[test]
fn launching_a_missing_executable_reports_launch_failed() {
    let td = tempfile::tempdir().expect("tempdir");
    let sup = ProcessSupervisor::new(LaunchMode::Direct);
    let err = sup
        .launch(
            td.path(),
            &td.path().join("no_such_gfx_app"),
            &["--fullscreen".to_owned()],
        )
        .expect_err("missing executable");

    assert!(matches!(err, SaverError::LaunchFailed { .. }));
    assert!(!sup.is_active());
}

#[cfg(unix)]
#[test]
fn helper_mode_adopts_the_published_pid_and_kills_through_the_helper() {
    use std::os::unix::fs::PermissionsExt as _;

    if !sh_available() {
        eprintln!("skipping: /bin/sh not found");
        return;
    }

    let td = tempfile::tempdir().expect("tempdir");
    let channel_path = td.path().join("channel");
    let helper_path = td.path().join("helper.sh");

    // A stand-in for the privileged helper: publish the child pid on the
    // channel and exec into the "graphics app", or kill on request.
    let script = format!(
        "#!/bin/sh\n\
         case \"$1\" in\n\
           -launch_gfx|-default_gfx)\n\
             echo $$ > '{channel}'\n\
             exec sleep 30\n\
             ;;\n\
           -kill_gfx)\n\
             kill -9 \"$2\" 2>/dev/null\n\
             echo 0 > '{channel}'\n\
             ;;\n\
         esac\n",
        channel = channel_path.display()
    );
    std::fs::write(&helper_path, script).expect("write helper");
    std::fs::set_permissions(&helper_path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod helper");

    let sup = ProcessSupervisor::new(LaunchMode::Helper {
        helper_path: helper_path.clone(),
        channel: PidChannel::at(channel_path),
    });

    sup.launch(
        td.path(),
        &helper_path,
        &[
            "-launch_gfx".to_owned(),
            "0".to_owned(),
            "--fullscreen".to_owned(),
        ],
    )
    .expect("helper launch");

    assert!(sup.is_active());
    let pid = sup.current_pid().expect("published pid");
    assert!(pid > 0);
    // The channel still holds the live pid, so the app counts as running.
    assert_eq!(sup.has_exited(), None);

    sup.terminate().expect("helper terminate");
    assert!(!sup.is_active());
}
