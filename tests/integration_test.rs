use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use qshell::{InputSource, Interpreter, MemWriter, ShellConfig};

fn temp_path(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("qshell_it_{tag}_{}_{}", std::process::id(), nanos))
}

fn write_script(tag: &str, body: &str) -> PathBuf {
    let path = temp_path(tag);
    fs::write(&path, body).unwrap();
    path
}

fn qshell(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_qshell"))
        .args(args)
        .env_remove("QSHELL_LOG")
        .output()
        .unwrap()
}

fn spawn_qshell(script: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_qshell"))
        .arg(script)
        .env_remove("QSHELL_LOG")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap()
}

/// Contents of `path` once something has been written to it.
fn wait_for_file(path: &Path) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Ok(text) = fs::read_to_string(path) {
            if text.ends_with('\n') {
                return text;
            }
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("{} was never written", path.display());
}

/// A foreground command that records its pid in `pid_file`, then sleeps.
fn sleeper(tag: &str, pid_file: &Path) -> PathBuf {
    write_script(tag, &format!("echo $$ > {}\nexec sleep 30\n", pid_file.display()))
}

fn is_gone(pid: Pid) -> bool {
    kill(pid, None::<Signal>) == Err(Errno::ESRCH)
}

fn run_script(body: &str) -> (Interpreter, String, String) {
    let script = write_script("lib", body);
    let out = MemWriter::new();
    let err = MemWriter::new();
    let mut sh = Interpreter::with_console(
        ShellConfig::default(),
        InputSource::open(&script).unwrap(),
        Box::new(out.clone()),
        Box::new(err.clone()),
    )
    .unwrap();
    sh.run().unwrap();
    let _ = fs::remove_file(script);
    (sh, out.contents(), err.contents())
}

#[test]
fn two_or_more_arguments_print_usage() {
    let output = qshell(&["a", "b"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "Usage: qshell [FILE]\n");
}

#[test]
fn missing_script_exits_with_one() {
    let output = qshell(&["/definitely/not/here/qshell.qsh"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unable to open commands file '/definitely/not/here/qshell.qsh'"));
}

#[test]
fn script_runs_pipeline_and_exits_cleanly() {
    let script = write_script("bin", "# say hello\necho hello | wc -l\nexit\necho never\n");
    let output = qshell(&[script.to_str().unwrap()]);
    let _ = fs::remove_file(&script);

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), "1");
}

#[test]
fn script_end_of_file_is_graceful_shutdown() {
    let script = write_script("eof", "true");
    let output = qshell(&[script.to_str().unwrap()]);
    let _ = fs::remove_file(&script);
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn redirections_through_the_interpreter() {
    let input = temp_path("in");
    let output = temp_path("out");
    fs::write(&input, "3\n1\n2\n").unwrap();

    let (sh, out, err) = run_script(&format!(
        "sort < {} > {}\n",
        input.display(),
        output.display()
    ));

    assert_eq!(out, "");
    assert_eq!(err, "");
    assert_eq!(sh.environment().last_status, 0);
    assert_eq!(fs::read_to_string(&output).unwrap(), "1\n2\n3\n");
    let _ = fs::remove_file(input);
    let _ = fs::remove_file(output);
}

#[test]
fn invalid_lines_create_no_process() {
    let marker = temp_path("marker");
    let lines = [
        format!("touch {} | | true", marker.display()),
        format!("touch {} &extra", marker.display()),
        format!("touch {} < a < b", marker.display()),
        format!("touch {} |", marker.display()),
        format!("touch {} <", marker.display()),
        format!("touch {} >", marker.display()),
    ];
    let (_, out, _) = run_script(&(lines.join("\n") + "\n"));

    assert_eq!(out.lines().count(), lines.len());
    assert!(out.lines().all(|l| l.starts_with("Syntax error")));
    assert!(!marker.exists());
}

#[test]
fn background_job_is_reaped_and_reported() {
    let (sh, out, _) = run_script("true &\nsleep 1\ntrue\n");
    let mut lines = out.lines();
    let started = lines.next().unwrap();
    let pid = started.trim_matches(|c| c == '[' || c == ']');
    assert_eq!(lines.next(), Some(format!("[{pid}] done, status 0").as_str()));
    assert!(sh.jobs().background_pids().is_empty());
}

#[test]
fn command_not_found_only_sets_status() {
    let (sh, out, _) = run_script("qshell_no_such_program_here\n");
    assert_eq!(out, "");
    assert_eq!(sh.environment().last_status, 127);
}

#[test]
fn interrupt_ends_foreground_job_and_shell_continues() {
    let pid_file = temp_path("int_pid");
    let helper = sleeper("int_helper", &pid_file);
    let script = write_script("int", &format!("sh {}\necho after\n", helper.display()));

    let started = Instant::now();
    let shell = spawn_qshell(&script);
    let job = Pid::from_raw(wait_for_file(&pid_file).trim().parse().unwrap());
    kill(Pid::from_raw(shell.id() as i32), Signal::SIGINT).unwrap();
    let output = shell.wait_with_output().unwrap();

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "after\n");
    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(is_gone(job));
    for path in [pid_file, helper, script] {
        let _ = fs::remove_file(path);
    }
}

#[test]
fn terminate_request_shuts_down_and_leaves_no_children() {
    let pid_file = temp_path("term_pid");
    let helper = sleeper("term_helper", &pid_file);
    let script = write_script("term", &format!("sh {}\necho never\n", helper.display()));

    let started = Instant::now();
    let shell = spawn_qshell(&script);
    let job = Pid::from_raw(wait_for_file(&pid_file).trim().parse().unwrap());
    kill(Pid::from_raw(shell.id() as i32), Signal::SIGTERM).unwrap();
    let output = shell.wait_with_output().unwrap();

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "");
    assert!(started.elapsed() < Duration::from_secs(20));
    assert!(is_gone(job));
    for path in [pid_file, helper, script] {
        let _ = fs::remove_file(path);
    }
}

#[test]
fn exit_stops_and_reaps_background_jobs() {
    let script = write_script("bg_exit", "sleep 30 &\nexit\n");

    let started = Instant::now();
    let output = qshell(&[script.to_str().unwrap()]);
    let _ = fs::remove_file(&script);

    assert_eq!(output.status.code(), Some(0));
    assert!(started.elapsed() < Duration::from_secs(20));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let pid: i32 = stdout
        .trim()
        .trim_matches(|c| c == '[' || c == ']')
        .parse()
        .unwrap();
    assert!(is_gone(Pid::from_raw(pid)));
}
