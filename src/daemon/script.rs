//! Control script synthesis.
//!
//! The generated script is a small state machine over two externally
//! visible states, running and stopped, driven by five operations:
//!
//! - `start`: no-op if already running. Otherwise launch the server (through
//!   `su` when the caller is not the daemon user), stdin from `/dev/null`,
//!   output to the log file if one is set, backgrounded unless the server
//!   forks itself. Optionally record the pid, then poll discovery up to
//!   `start_wait` times one second apart. The lock-directory marker is
//!   touched only on success.
//! - `stop`: drop the lock marker, run `stop_cmd` or signal every discovered
//!   pid, then `stop_cmd2` if set. Either failing aborts. Then poll for the
//!   processes to disappear, up to `stop_wait` times.
//! - `reload`: `reload_cmd` and report its status, else signal with
//!   `reload_signal`, else (or if signalling found nothing) a full restart.
//! - `restart`: stop (failure ignored), sleep `restart_delay`, start.
//! - `status`: print the discovered pids, or report stopped.
//!
//! Discovery reads the first line of the pid file when it is non-empty and
//! never looks further. Only without one does it scan `ps` for `procname`,
//! restricted to the daemon user unless that user is root, excluding the
//! script's own pid. It succeeds if at least one candidate answers
//! `kill -0`.
//!
//! No lock is held across operations. Two overlapping invocations (say a
//! `start` during the delay of a `restart`) can race.

use super::DaemonSpec;

/// Render the control script for one daemon.
pub fn render(spec: &DaemonSpec) -> String {
    let levels = if spec.rc2 { "2345" } else { "345" };

    let mut out = format!(
        "#!/bin/sh\n\
         #\n\
         # chkconfig: {levels} {start:02} {kill:02}\n\
         # description: {name}\n\
         \n\
         set -e\n\
         \n",
        levels = levels,
        start = spec.start_num,
        kill = spec.kill_num,
        name = spec.name,
    );

    let restart_delay = spec.restart_delay_secs.to_string();
    let settings: [(&str, &str); 15] = [
        ("name", spec.name.as_str()),
        ("procname", opt(&spec.proc_name)),
        ("server_cmd", spec.start_cmd.as_str()),
        ("forks", flag(spec.forks)),
        ("stop_cmd", opt(&spec.stop_cmd)),
        ("stop_cmd2", opt(&spec.stop_cmd2)),
        ("reload_cmd", opt(&spec.reload_cmd)),
        ("stop_signal", spec.stop_signal.as_str()),
        ("reload_signal", opt(&spec.reload_signal)),
        ("pidfile", spec.pid_file.as_str()),
        ("write_pid", flag(spec.write_pid)),
        ("logfile", opt(&spec.log_file)),
        ("lockdir", spec.lock_dir.as_str()),
        ("user", spec.user.as_str()),
        ("restart_delay", restart_delay.as_str()),
    ];
    for (key, value) in settings {
        out.push_str(&format!("{}=\"{}\"\n", key, double_quoted(value)));
    }
    out.push_str(&format!("start_wait={}\n", spec.start_wait));
    out.push_str(&format!("stop_wait={}\n\n", spec.stop_wait));

    for var in &spec.env {
        let line = match &var.value {
            Some(value) => format!(
                "{name}='{}'; export {name}\n",
                single_quoted(value),
                name = var.name
            ),
            None => format!("unset {} || true\n", var.name),
        };
        out.push_str(&line);
    }
    if !spec.env.is_empty() {
        out.push('\n');
    }

    out.push_str(BODY);
    out
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Escape for a double-quoted assignment so the variable holds the text as
/// configured; expansion happens when the script `eval`s it.
fn double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn single_quoted(value: &str) -> String {
    value.replace('\'', "'\\''")
}

const BODY: &str = r#"start() {
    proccmd checkprocs && return 0

    cmd="$server_cmd"

    # switch to the daemon user when needed
    me=`id | sed 's/[^(]*(//;s/).*//'`
    if [ "$me" != "$user" ]
    then
	su=su
	if su --help 2>/dev/null | grep -- --shell >/dev/null
	then
	    su="$su --shell /bin/sh"
	fi
	cmd="$su $user -c '$cmd'"
    fi

    cd /
    trap "" HUP
    cmd="$cmd </dev/null"
    test -z "$logfile" || cmd="$cmd >$logfile 2>&1"
    test "$forks" = "1" || cmd="$cmd &"

    eval "$cmd"
    pid=$!
    test "$write_pid" != "1" || echo $pid >"$pidfile"

    rc=1
    i=0
    while [ $i -lt $start_wait ]
    do
	if proccmd checkprocs
	then
	    rc=0
	    break
	fi
	sleep 1
	i=`expr $i + 1`
    done

    if [ $rc -eq 0 ] && [ -d "$lockdir" ]
    then
	touch "$lockdir/$name"
    fi
    return $rc
}

stop() {
    if [ -d "$lockdir" ]
    then
	rm -f "$lockdir/$name"
    fi

    if [ -z "$stop_cmd" ]
    then
	proccmd "kill -$stop_signal" || return 1
    else
	eval "$stop_cmd" || return 1
    fi
    if [ -n "$stop_cmd2" ]
    then
	eval "$stop_cmd2" || return 1
    fi

    rc=1
    i=0
    while [ $i -lt $stop_wait ]
    do
	if ! proccmd checkprocs
	then
	    rc=0
	    break
	fi
	sleep 1
	i=`expr $i + 1`
    done
    if [ $rc -ne 0 ]
    then
	echo "$name still running after $stop_wait seconds" 1>&2
    fi
    return $rc
}

reload() {
    if [ -n "$reload_cmd" ]
    then
	if eval "$reload_cmd"
	then
	    return 0
	fi
	return 1
    elif [ -n "$reload_signal" ]
    then
	proccmd "kill -$reload_signal" && return 0
    fi
    restart
}

# stop and start are not serialized against other invocations.
restart() {
    stop || true
    sleep $restart_delay
    start
}

checked_pids=""
checkprocs() {
    checked_pids="$*"
    kill -0 $* 2>/dev/null || return 1
}

status() {
    if proccmd checkprocs
    then
	echo "$name running: $checked_pids"
	return 0
    else
	echo "$name stopped"
	return 1
    fi
}

# Run "$1 <pids>" over the live pids of the daemon.
# Never redirect the output of a proccmd call: the redirect forks a copy of
# this script, which ps would then report as the server.
proccmd() {
    cmd=$1
    pids=""

    if [ -f "$pidfile" ]
    then
	pids=`head -1 "$pidfile"`
    fi

    if [ -z "$pids" ]
    then
	test -n "$procname" || return 1
	if [ "$user" = "root" ]
	then
	    psopts="-e"
	else
	    psopts="-u $user"
	fi
	pids=`ps $psopts | grep -w "$procname" | sed -e 's/^  *//' -e 's/ .*//'`
    fi

    live=""
    for pid in $pids
    do
	if [ "$pid" != "$$" ] && kill -0 $pid 2>/dev/null
	then
	    live="$live $pid"
	fi
    done

    test -n "$live" || return 1
    $cmd $live
}

case "$1" in
start|stop|restart|reload|status)
    $1
    ;;
*)
    echo "Usage: $0 start|stop|restart|reload|status" 1>&2
    exit 1
    ;;
esac
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::EnvVar;

    fn httpd() -> DaemonSpec {
        DaemonSpec::new("httpd", "/usr/sbin/httpd -k start", "apache")
    }

    #[test]
    fn test_header_priorities() {
        let script = render(&httpd());
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("# chkconfig: 345 99 01\n"));
        assert!(script.contains("# description: httpd\n"));

        let mut spec = httpd();
        spec.start_num = 5;
        spec.kill_num = 95;
        spec.rc2 = true;
        assert!(render(&spec).contains("# chkconfig: 2345 05 95\n"));
    }

    #[test]
    fn test_settings_block() {
        let mut spec = httpd();
        spec.write_pid = true;
        spec.reload_signal = Some("HUP".into());
        spec.restart_delay_secs = 3;
        let script = render(&spec);
        assert!(script.contains("server_cmd=\"/usr/sbin/httpd -k start\"\n"));
        assert!(script.contains("write_pid=\"1\"\n"));
        assert!(script.contains("forks=\"0\"\n"));
        assert!(script.contains("reload_signal=\"HUP\"\n"));
        assert!(script.contains("stop_cmd=\"\"\n"));
        assert!(script.contains("pidfile=\"/var/run/httpd.pid\"\n"));
        assert!(script.contains("restart_delay=\"3\"\n"));
        assert!(script.contains("start_wait=10\n"));
    }

    #[test]
    fn test_quoting() {
        let mut spec = httpd();
        spec.start_cmd = r#"java -Dname="x" $OPTS"#.into();
        spec.env = vec![
            EnvVar {
                name: "GREETING".into(),
                value: Some("it's".into()),
            },
            EnvVar {
                name: "LANG".into(),
                value: None,
            },
        ];
        let script = render(&spec);
        assert!(script.contains(r#"server_cmd="java -Dname=\"x\" \$OPTS""#));
        assert!(script.contains("GREETING='it'\\''s'; export GREETING\n"));
        assert!(script.contains("unset LANG || true\n"));
    }

    #[test]
    fn test_restart_is_not_serialized() {
        let script = render(&httpd());
        let restart = script
            .split("restart() {")
            .nth(1)
            .and_then(|rest| rest.split("\n}\n").next())
            .unwrap();
        assert!(restart.contains("stop || true"));
        assert!(restart.contains("sleep $restart_delay"));
        assert!(restart.contains("start"));
        assert!(!script.contains("flock"));
    }

    #[test]
    fn test_operations_dispatch() {
        let script = render(&httpd());
        for op in ["start()", "stop()", "reload()", "restart()", "status()", "proccmd()"] {
            assert!(script.contains(op), "missing {op}");
        }
        assert!(script.contains("start|stop|restart|reload|status)"));
    }

    mod run {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};
        use std::process::{Command, Output};
        use tempfile::TempDir;

        /// Fake `ps` that records it was called and reports one process.
        fn fake_ps(dir: &Path, pid: u32, procname: &str) -> (PathBuf, PathBuf) {
            let bin = dir.join("bin");
            fs::create_dir_all(&bin).unwrap();
            let marker = dir.join("ps-called");
            let ps = bin.join("ps");
            fs::write(
                &ps,
                format!(
                    "#!/bin/sh\ntouch {}\necho \"  PID TTY          TIME CMD\"\necho \"  {} ?        00:00:00 {}\"\n",
                    marker.display(),
                    pid,
                    procname
                ),
            )
            .unwrap();
            fs::set_permissions(&ps, fs::Permissions::from_mode(0o755)).unwrap();
            (bin, marker)
        }

        fn run(script: &str, dir: &Path, op: &str, bin: Option<&Path>) -> Output {
            let path = dir.join("daemon.init");
            fs::write(&path, script).unwrap();
            let mut cmd = Command::new("/bin/sh");
            cmd.arg(&path).arg(op);
            if let Some(bin) = bin {
                let inherited = std::env::var("PATH").unwrap_or_default();
                cmd.env("PATH", format!("{}:{}", bin.display(), inherited));
            }
            cmd.output().unwrap()
        }

        fn spec_in(dir: &TempDir) -> DaemonSpec {
            let mut spec = DaemonSpec::new("fake", "sleep 30", "root");
            spec.pid_file = dir.path().join("fake.pid").display().to_string();
            spec.lock_dir = dir.path().join("lock").display().to_string();
            spec.proc_name = Some("fakeproc".into());
            spec
        }

        #[test]
        fn test_pid_file_wins_over_process_table() {
            let dir = tempfile::tempdir().unwrap();
            let spec = spec_in(&dir);
            let me = std::process::id();
            fs::write(&spec.pid_file, format!("{}\n", me)).unwrap();
            // The table would report a different, dead pid.
            let (bin, marker) = fake_ps(dir.path(), 999_999, "fakeproc");

            let out = run(&render(&spec), dir.path(), "status", Some(&bin));
            let stdout = String::from_utf8_lossy(&out.stdout);
            assert!(out.status.success(), "stdout: {stdout}");
            assert_eq!(stdout.trim(), format!("fake running: {}", me));
            assert!(!marker.exists(), "ps must not be consulted");
        }

        #[test]
        fn test_falls_back_to_process_table() {
            let dir = tempfile::tempdir().unwrap();
            let spec = spec_in(&dir);
            let me = std::process::id();
            let (bin, marker) = fake_ps(dir.path(), me, "fakeproc");

            let out = run(&render(&spec), dir.path(), "status", Some(&bin));
            let stdout = String::from_utf8_lossy(&out.stdout);
            assert!(out.status.success(), "stdout: {stdout}");
            assert_eq!(stdout.trim(), format!("fake running: {}", me));
            assert!(marker.exists());
        }

        #[test]
        fn test_empty_pid_file_and_no_procname_is_stopped() {
            let dir = tempfile::tempdir().unwrap();
            let mut spec = spec_in(&dir);
            spec.proc_name = None;
            fs::write(&spec.pid_file, "").unwrap();

            let out = run(&render(&spec), dir.path(), "status", None);
            assert_eq!(out.status.code(), Some(1));
            assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "fake stopped");
        }

        #[test]
        fn test_unknown_operation_prints_usage() {
            let dir = tempfile::tempdir().unwrap();
            let out = run(&render(&spec_in(&dir)), dir.path(), "bounce", None);
            assert_eq!(out.status.code(), Some(1));
            assert!(String::from_utf8_lossy(&out.stderr).contains("Usage:"));
        }

        /// Login name as the script computes it, so `start` never needs `su`.
        fn current_user() -> String {
            let out = Command::new("/bin/sh")
                .arg("-c")
                .arg("id | sed 's/[^(]*(//;s/).*//'")
                .output()
                .unwrap();
            String::from_utf8_lossy(&out.stdout).trim().to_string()
        }

        fn read(path: &Path) -> String {
            fs::read_to_string(path).unwrap_or_default()
        }

        #[test]
        fn test_stop_drops_marker_then_runs_both_commands() {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("calls.log");
            let mut spec = spec_in(&dir);
            spec.proc_name = None;
            spec.stop_cmd = Some(format!(
                "test ! -e \"$lockdir/$name\" && echo stop >>{}",
                log.display()
            ));
            spec.stop_cmd2 = Some(format!("echo stop2 >>{}", log.display()));
            fs::create_dir_all(&spec.lock_dir).unwrap();
            let marker = Path::new(&spec.lock_dir).join("fake");
            fs::write(&marker, "").unwrap();

            let out = run(&render(&spec), dir.path(), "stop", None);
            assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
            assert!(!marker.exists());
            assert_eq!(read(&log), "stop\nstop2\n");
        }

        #[test]
        fn test_failed_stop_cmd_skips_cleanup() {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("calls.log");
            let mut spec = spec_in(&dir);
            spec.proc_name = None;
            spec.stop_cmd = Some("false".into());
            spec.stop_cmd2 = Some(format!("echo stop2 >>{}", log.display()));

            let out = run(&render(&spec), dir.path(), "stop", None);
            assert_eq!(out.status.code(), Some(1));
            assert!(!log.exists());
        }

        #[test]
        fn test_stop_gives_up_after_wait_budget() {
            let dir = tempfile::tempdir().unwrap();
            let mut spec = spec_in(&dir);
            // A pid that stays alive: the test process itself. The stop
            // command leaves it alone.
            fs::write(&spec.pid_file, format!("{}\n", std::process::id())).unwrap();
            spec.stop_cmd = Some("true".into());
            spec.stop_wait = 1;

            let out = run(&render(&spec), dir.path(), "stop", None);
            assert_eq!(out.status.code(), Some(1));
            assert!(String::from_utf8_lossy(&out.stderr)
                .contains("fake still running after 1 seconds"));
        }

        #[test]
        fn test_reload_cmd_status_is_returned() {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("calls.log");
            let mut spec = spec_in(&dir);
            spec.reload_cmd = Some(format!("echo reload >>{}; false", log.display()));

            let out = run(&render(&spec), dir.path(), "reload", None);
            assert_eq!(out.status.code(), Some(1));
            assert_eq!(read(&log), "reload\n");

            spec.reload_cmd = Some("true".into());
            let out = run(&render(&spec), dir.path(), "reload", None);
            assert!(out.status.success());
        }

        #[test]
        fn test_reload_without_cmd_or_signal_restarts() {
            let dir = tempfile::tempdir().unwrap();
            let mut spec = spec_in(&dir);
            spec.user = current_user();
            spec.proc_name = None;
            spec.write_pid = true;
            spec.log_file = Some(dir.path().join("fake.log").display().to_string());
            fs::create_dir_all(&spec.lock_dir).unwrap();

            // Nothing is running, so the stop half fails and is ignored.
            let out = run(&render(&spec), dir.path(), "reload", None);
            let pid = read(Path::new(&spec.pid_file)).trim().to_string();
            assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
            assert!(!pid.is_empty());
            assert!(Path::new(&spec.lock_dir).join("fake").exists());

            let _ = Command::new("kill").arg("-9").arg(&pid).status();
        }

        #[test]
        fn test_start_writes_pid_and_lock_marker() {
            let dir = tempfile::tempdir().unwrap();
            let mut spec = spec_in(&dir);
            spec.user = current_user();
            spec.proc_name = None;
            spec.write_pid = true;
            spec.log_file = Some(dir.path().join("fake.log").display().to_string());
            fs::create_dir_all(&spec.lock_dir).unwrap();
            let script = render(&spec);

            let out = run(&script, dir.path(), "start", None);
            let pid = fs::read_to_string(&spec.pid_file).unwrap_or_default();
            let pid = pid.trim().to_string();
            assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
            assert!(!pid.is_empty());
            assert!(Path::new(&spec.lock_dir).join("fake").exists());

            let status = run(&script, dir.path(), "status", None);
            assert!(status.status.success());
            assert!(String::from_utf8_lossy(&status.stdout).contains(&pid));

            // Starting again is a no-op.
            let again = run(&script, dir.path(), "start", None);
            assert!(again.status.success());
            assert_eq!(fs::read_to_string(&spec.pid_file).unwrap().trim(), pid);

            let _ = Command::new("kill").arg("-9").arg(&pid).status();
        }
    }
}
