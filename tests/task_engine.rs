mod common;

use common::{drive, environment, inline_config, sh_task, MemorySink, TEST_DEADLINE};
use pssh::core::{IoMap, BUFFER_SIZE};
use pssh::{Manager, ManagerConfig, PollIoMap, TaskConfig};
use std::time::{Duration, Instant};

#[test]
fn test_hello_exits_cleanly() {
    let mut iomap = PollIoMap::new();
    let mut task = sh_task("web1", "echo hello", inline_config());
    task.start(0, &mut iomap, None, &environment(), None).unwrap();
    drive(&mut task, &mut iomap, None);

    let result = task.into_result();
    assert_eq!(result.stdout, b"hello\n");
    assert_eq!(result.exitcode, Some(0));
    assert!(result.failures.is_empty());
    assert!(result.started.is_some());
    assert!(iomap.is_empty());
}

#[test]
fn test_error_exit_code_recorded() {
    let mut iomap = PollIoMap::new();
    let mut task = sh_task("web1", "echo oops >&2; exit 3", inline_config());
    task.start(0, &mut iomap, None, &environment(), None).unwrap();
    drive(&mut task, &mut iomap, None);

    let result = task.into_result();
    assert_eq!(result.failures, vec!["Exited with error code 3"]);
    assert_eq!(result.exitcode, Some(3));
    assert_eq!(result.stderr, b"oops\n");
}

#[test]
fn test_killed_by_signal_reported() {
    let mut iomap = PollIoMap::new();
    let mut task = sh_task("web1", "kill -TERM $$", inline_config());
    task.start(0, &mut iomap, None, &environment(), None).unwrap();
    drive(&mut task, &mut iomap, None);

    assert_eq!(task.exitstatus(), Some(-15));
    assert_eq!(task.failures(), &["Killed by signal 15".to_string()]);
}

#[test]
fn test_timeout_kills_process_group() {
    let mut iomap = PollIoMap::new();
    // The background sleep holds stdout open too, so only a group kill ends it.
    let mut task = sh_task("web1", "sleep 60 & sleep 60", inline_config());
    task.start(0, &mut iomap, None, &environment(), None).unwrap();
    drive(&mut task, &mut iomap, Some(Duration::from_millis(200)));

    assert!(task.killed());
    assert!(!task.has_open_pipes());
    assert_eq!(task.exitstatus(), Some(-9));
    assert_eq!(task.failures(), &["Timed out".to_string()]);
}

#[test]
fn test_empty_input_closes_stdin() {
    let mut iomap = PollIoMap::new();
    let mut task = sh_task("web1", "cat", inline_config());
    task.start(0, &mut iomap, None, &environment(), None).unwrap();
    assert_eq!(task.stdin_fd(), None);
    assert_eq!(iomap.len(), 2);

    // cat sees EOF at once instead of waiting on a pipe nobody writes.
    drive(&mut task, &mut iomap, Some(Duration::from_secs(10)));
    assert_eq!(task.exitstatus(), Some(0));
    assert!(task.failures().is_empty());
}

#[test]
fn test_large_input_written_in_chunks() {
    let input: Vec<u8> = (0..BUFFER_SIZE * 4 + 123).map(|i| (i % 251) as u8).collect();
    let mut iomap = PollIoMap::new();
    let mut task = sh_task("web1", "cat", inline_config()).with_input(input.clone());
    task.start(0, &mut iomap, None, &environment(), None).unwrap();
    let stdin_fd = task.stdin_fd().expect("stdin stays open for input");
    assert!(iomap.is_registered(stdin_fd));

    let stdin_events = drive(&mut task, &mut iomap, None);
    assert!(stdin_events > 1, "expected several writes, got {}", stdin_events);
    assert_eq!(task.bytes_written(), input.len());
    assert_eq!(task.output(), input.as_slice());
    assert_eq!(task.exitstatus(), Some(0));
}

#[test]
fn test_stopped_task_has_status_and_no_pipes() {
    for script in ["true", "exit 7", "echo out; echo err >&2"] {
        let mut iomap = PollIoMap::new();
        let mut task = sh_task("web1", script, TaskConfig::default());
        task.start(0, &mut iomap, None, &environment(), None).unwrap();
        drive(&mut task, &mut iomap, None);
        assert!(task.exitstatus().is_some(), "no status for {:?}", script);
        assert!(!task.has_open_pipes());
        assert!(iomap.is_empty());
    }
}

#[test]
fn test_output_not_captured_without_inline() {
    let mut iomap = PollIoMap::new();
    let mut task = sh_task("web1", "echo hidden", TaskConfig::default());
    task.start(0, &mut iomap, None, &environment(), None).unwrap();
    drive(&mut task, &mut iomap, None);
    assert!(task.output().is_empty());
    assert_eq!(task.exitstatus(), Some(0));
}

#[test]
fn test_child_environment() {
    let mut iomap = PollIoMap::new();
    let mut task = sh_task(
        "web1",
        "echo $PSSH_NODENUM $PSSH_HOST $SSH_ASKPASS $PSSH_ASKPASS_SOCKET $DISPLAY",
        inline_config(),
    );
    task.start(7, &mut iomap, None, &environment(), Some("/tmp/pssh.sock"))
        .unwrap();
    drive(&mut task, &mut iomap, None);
    assert_eq!(
        String::from_utf8_lossy(task.output()),
        "7 web1 /opt/pssh/askpass /tmp/pssh.sock pssh-gibberish\n"
    );
}

#[cfg(target_os = "linux")]
#[test]
fn test_child_leads_its_own_session() {
    let mut iomap = PollIoMap::new();
    // pid, process group and session from /proc/<pid>/stat
    let mut task = sh_task("web1", "cut -d' ' -f1,5,6 /proc/$$/stat", inline_config());
    task.start(0, &mut iomap, None, &environment(), None).unwrap();
    drive(&mut task, &mut iomap, None);

    let output = String::from_utf8_lossy(task.output()).to_string();
    let ids: Vec<&str> = output.split_whitespace().collect();
    assert_eq!(ids.len(), 3, "unexpected stat fields {:?}", output);
    assert_eq!(ids[0], ids[1]);
    assert_eq!(ids[0], ids[2]);
}

#[test]
fn test_sink_receives_output_and_is_closed() {
    let sink = MemorySink::default();
    let mut writer = sink.clone();
    let mut iomap = PollIoMap::new();
    let mut task = sh_task("web1", "echo out; echo err >&2", TaskConfig::default());
    task.start(0, &mut iomap, Some(&mut writer), &environment(), None)
        .unwrap();
    drive(&mut task, &mut iomap, None);

    assert_eq!(sink.contents("out/web1"), b"out\n");
    assert_eq!(sink.contents("err/web1"), b"err\n");
    let mut closed = sink.closed.borrow().clone();
    closed.sort();
    assert_eq!(closed, vec!["err/web1", "out/web1"]);
}

#[test]
fn test_stale_readiness_ignored() {
    let mut iomap = PollIoMap::new();
    let mut task = sh_task("web1", "true", inline_config());
    task.start(0, &mut iomap, None, &environment(), None).unwrap();
    drive(&mut task, &mut iomap, None);

    let failures = task.failures().to_vec();
    task.handle_ready(12345, &mut iomap);
    iomap.unregister(12345);
    assert_eq!(task.failures(), failures.as_slice());
}

#[test]
fn test_manager_end_to_end() {
    let sink = MemorySink::default();
    let tasks = vec![
        sh_task("ok", "echo hello", inline_config()),
        sh_task("bad", "exit 3", inline_config()),
        sh_task("slow", "sleep 60", inline_config()),
    ];
    let mut manager = Manager::new(
        ManagerConfig {
            par: 2,
            timeout: Some(Duration::from_millis(500)),
            askpass_socket: None,
        },
        environment(),
    )
    .with_sink(Box::new(sink.clone()));

    let mut order = Vec::new();
    let results = manager
        .run(tasks, |result| order.push(result.host.clone()))
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(order.last().map(String::as_str), Some("slow"));

    let by_host = |host: &str| results.iter().find(|r| r.host == host).unwrap();
    assert_eq!(by_host("ok").stdout, b"hello\n");
    assert!(by_host("ok").failures.is_empty());
    assert_eq!(by_host("bad").failures, vec!["Exited with error code 3"]);
    assert_eq!(by_host("slow").exitcode, Some(-9));
    assert_eq!(by_host("slow").failures, vec!["Timed out"]);
    assert_eq!(sink.contents("out/ok"), b"hello\n");
    assert_eq!(pssh::report::exit_code(&results), 3);
}

#[test]
fn test_killed_child_without_pipes_stops_running() {
    let mut iomap = PollIoMap::new();
    let mut task = sh_task("web1", "exec >&- 2>&-; sleep 30", inline_config());
    task.start(0, &mut iomap, None, &environment(), None).unwrap();

    let deadline = Instant::now() + TEST_DEADLINE;
    while task.has_open_pipes() {
        assert!(Instant::now() < deadline, "pipes never closed");
        for ready in iomap.poll(Some(Duration::from_millis(10))).unwrap() {
            task.handle_ready(ready.fd, &mut iomap);
        }
    }

    task.timedout();
    assert!(!task.running());
    assert_eq!(task.exitstatus(), Some(-9));
    assert_eq!(task.failures(), &["Timed out".to_string()]);
}

#[test]
fn test_input_to_exited_child_closes_stdin() {
    let input = vec![b'x'; BUFFER_SIZE * 8];
    let mut iomap = PollIoMap::new();
    let mut task = sh_task("web1", "exit 0", inline_config()).with_input(input.clone());
    task.start(0, &mut iomap, None, &environment(), None).unwrap();
    drive(&mut task, &mut iomap, None);

    assert!(task.bytes_written() < input.len());
    assert!(!task.has_open_pipes());
    assert!(iomap.is_empty());
    assert_eq!(task.exitstatus(), Some(0));
    assert_eq!(task.failures().len(), 1, "failures: {:?}", task.failures());
    assert!(task.failures()[0].contains("Broken pipe"));
}

#[test]
fn test_verbose_failure_has_details() {
    let config = TaskConfig {
        verbose: true,
        ..inline_config()
    };
    let mut iomap = PollIoMap::new();
    let mut task = sh_task("web1", "exit 0", config).with_input(vec![b'x'; BUFFER_SIZE * 8]);
    task.start(0, &mut iomap, None, &environment(), None).unwrap();
    drive(&mut task, &mut iomap, None);

    assert_eq!(task.failures().len(), 1, "failures: {:?}", task.failures());
    assert!(task.failures()[0].starts_with("Exception: "));
    assert!(task.failures()[0].contains("BrokenPipe"));
}
