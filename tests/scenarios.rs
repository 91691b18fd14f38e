mod common;

use common::{FakeDevice, zephyr_help};
use shelltap::config::DiscoveryConfig;
use shelltap::discovery::Argument;
use shelltap::matchers::{FieldSlicer, LiteralCounter, SignalCounter, SignalState};
use shelltap::{
    CounterKind, DiscoveryEngine, PromptDetection, ScanEvent, PromptDetector, Scheduler, Scope, Script,
    ScriptRunner, ShellError, Watchers,
};
use std::collections::HashMap;
use std::time::Duration;

fn replies(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn names(engine: &DiscoveryEngine) -> Vec<String> {
    engine
        .snapshot()
        .iter()
        .map(|n| n.full_name.clone())
        .collect()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test(start_paused = true)]
async fn test_listing_roots() {
    let device = FakeDevice::scripted(replies(&[(
        "help",
        "Available commands:\nfoo : does foo\nbar : does bar",
    )]));
    let engine = DiscoveryEngine::new(DiscoveryConfig::default());
    let report = engine.scan(&device.session).await.unwrap();

    assert_eq!(report.roots, 2);
    assert_eq!(names(&engine), ["foo", "bar"]);
    let registry = engine.snapshot();
    assert!(registry.iter().all(|n| n.is_root && n.args.is_empty()));
    assert_eq!(registry.get("foo").unwrap().description, "does foo");
}

#[tokio::test(start_paused = true)]
async fn test_subcommands_become_children() {
    let device = FakeDevice::scripted(replies(&[
        ("help", "Available commands:\n  net : Networking\n"),
        ("net --help", "Subcommands:\nstats : show stats\niface : show iface"),
    ]));
    let engine = DiscoveryEngine::new(DiscoveryConfig::default());
    let report = engine.scan(&device.session).await.unwrap();

    assert_eq!(report.discovered, 2);
    assert_eq!(names(&engine), ["net", "net stats", "net iface"]);
    let registry = engine.snapshot();
    let stats = registry.get("net stats").unwrap();
    assert_eq!(stats.parent_name.as_deref(), Some("net"));
    assert!(!stats.is_root);
}

#[tokio::test(start_paused = true)]
async fn test_zephyr_tree_with_pruning() {
    let device = FakeDevice::scripted(zephyr_help());
    let engine = DiscoveryEngine::new(DiscoveryConfig::default());
    let report = engine.scan(&device.session).await.unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.pruned, ["kernel", "net"]);
    assert_eq!(
        names(&engine),
        [
            "clear",
            "kernel uptime",
            "kernel version",
            "net iface",
            "net stats",
            "net stats all",
            "reboot",
        ]
    );
    let registry = engine.snapshot();
    assert_eq!(
        registry.get("net stats").unwrap().args,
        vec![Argument {
            name: "index".into(),
            required: false
        }]
    );
    assert!(!device.commands().contains(&"net stats stats --help".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_subcommand_named_like_parent_not_inserted() {
    let device = FakeDevice::scripted(zephyr_help());
    let engine = DiscoveryEngine::new(DiscoveryConfig::default());
    engine.scan(&device.session).await.unwrap();
    let registry = engine.snapshot();
    assert!(!registry.contains("net stats stats"));
    assert!(registry.children("net stats").iter().all(|c| c.name != "stats"));
}

#[tokio::test(start_paused = true)]
async fn test_rescan_is_idempotent_and_keeps_edits() {
    let device = FakeDevice::scripted(zephyr_help());
    let engine = DiscoveryEngine::new(DiscoveryConfig::default());
    engine.scan(&device.session).await.unwrap();
    let first = engine.snapshot();

    engine.scan(&device.session).await.unwrap();
    assert_eq!(engine.snapshot(), first);

    engine
        .registry()
        .write()
        .unwrap()
        .edit("net iface", |node| node.description = "Interfaces".into())
        .unwrap();
    engine.scan(&device.session).await.unwrap();
    let registry = engine.snapshot();
    let iface = registry.get("net iface").unwrap();
    assert!(iface.user_modified);
    assert_eq!(iface.description, "Interfaces");
    assert_eq!(registry.len(), first.len());
}

#[tokio::test(start_paused = true)]
async fn test_custom_category_survives_pruning() {
    let device = FakeDevice::scripted(zephyr_help());
    let engine = DiscoveryEngine::new(DiscoveryConfig::default());
    let mut custom = shelltap::discovery::CommandNode::custom("net", "Networking", Vec::new());
    custom.is_root = true;
    engine.registry().write().unwrap().add_custom(custom);

    let report = engine.scan(&device.session).await.unwrap();
    assert_eq!(report.pruned, ["kernel"]);
    assert!(engine.snapshot().contains("net"));
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_times_out() {
    let device = FakeDevice::start(|_| None);
    let engine = DiscoveryEngine::new(DiscoveryConfig::default());
    let err = engine.scan(&device.session).await.unwrap_err();
    assert!(matches!(err, ShellError::DiscoveryTimeout(_)), "got {err:?}");
    assert!(!engine.is_scanning());
    assert!(!device.session.is_capturing());
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_listing_format() {
    let device = FakeDevice::scripted(replies(&[("help", "help: command not found")]));
    let engine = DiscoveryEngine::new(DiscoveryConfig::default());
    let err = engine.scan(&device.session).await.unwrap_err();
    assert!(matches!(err, ShellError::UnexpectedFormat { .. }), "got {err:?}");
    assert!(!engine.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_scan_lock_fails_fast() {
    let device = FakeDevice::scripted(zephyr_help());
    let engine = DiscoveryEngine::new(DiscoveryConfig::default());
    let scan = engine.begin(&device.session).unwrap();
    assert!(engine.is_scanning());
    assert!(matches!(
        engine.scan(&device.session).await,
        Err(ShellError::ScanInProgress)
    ));
    drop(scan);
    assert!(!engine.is_scanning());
    assert!(engine.scan(&device.session).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_selected_roots_only() {
    let device = FakeDevice::scripted(zephyr_help());
    let engine = DiscoveryEngine::new(DiscoveryConfig::default());
    let mut scan = engine.begin(&device.session).unwrap();
    let roots = scan.list().await.unwrap();
    assert_eq!(roots.len(), 4);
    let report = scan.deep_scan(Some(&["kernel".to_string()])).await;

    assert_eq!(report.roots, 1);
    assert_eq!(report.discovered, 2);
    assert!(!device.commands().iter().any(|c| c.starts_with("net")));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_scan_keeps_findings() {
    let device = FakeDevice::scripted(zephyr_help());
    let engine = DiscoveryEngine::new(DiscoveryConfig::default());
    let mut scan = engine.begin(&device.session).unwrap();
    scan.list().await.unwrap();
    scan.control().cancel();
    let report = scan.deep_scan(None).await;

    assert!(report.cancelled);
    assert_eq!(report.discovered, 0);
    assert_eq!(engine.snapshot().len(), 4);
    assert!(!engine.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_scan_prunes_partial_tree() {
    let device = FakeDevice::scripted(zephyr_help());
    let engine = DiscoveryEngine::new(DiscoveryConfig::default());
    let mut scan = engine.begin(&device.session).unwrap();
    let control = scan.control();
    let mut events = scan.events().unwrap();
    scan.list().await.unwrap();

    let supervise = async {
        while let Some(event) = events.recv().await {
            if matches!(&event, ScanEvent::Discovered { full_name } if full_name == "kernel version")
            {
                control.cancel();
            }
        }
    };
    let (report, ()) = tokio::join!(scan.deep_scan(None), supervise);

    assert!(report.cancelled);
    assert_eq!(report.pruned, ["kernel"]);
    let registry = engine.snapshot();
    assert!(registry.contains("kernel uptime"));
    assert!(registry.contains("kernel version"));
    assert!(registry.contains("net"));
    assert!(!registry.contains("net iface"));
    assert!(!device.commands().contains(&"net --help".to_string()));
    assert!(!engine.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_discover_one_refreshes_children() {
    let device = FakeDevice::scripted(zephyr_help());
    let engine = DiscoveryEngine::new(DiscoveryConfig::default());
    let mut scan = engine.begin(&device.session).unwrap();
    scan.list().await.unwrap();
    drop(scan);

    let children = engine.discover_one(&device.session, "net").await.unwrap();
    let names: Vec<_> = children.iter().map(|c| c.full_name.as_str()).collect();
    assert_eq!(names, ["net iface", "net stats"]);
    assert!(!engine.snapshot().contains("net stats all"));
}

#[tokio::test(start_paused = true)]
async fn test_active_prompt_detection() {
    let device = FakeDevice::start(|_| Some(String::new()));
    assert_eq!(device.session.prompt(), None);
    let detection = PromptDetector::default()
        .detect_active(&device.session)
        .await
        .unwrap();
    assert_eq!(detection, PromptDetection::Detected("uart:~$".into()));
    assert_eq!(device.session.prompt().as_deref(), Some("uart:~$"));
}

#[tokio::test(start_paused = true)]
async fn test_prompt_fallback_on_silence() {
    let device = FakeDevice::start(|_| None);
    let detection = PromptDetector::default()
        .detect_active(&device.session)
        .await
        .unwrap();
    assert!(detection.is_fallback());
    assert_eq!(device.session.prompt().as_deref(), Some("uart:~$"));
}

fn retval_device(codes: &'static [(&'static str, i64)]) -> FakeDevice {
    let mut last = 0;
    FakeDevice::start(move |command| {
        if command == "retval" {
            return Some(format!("retval: {last}"));
        }
        last = codes
            .iter()
            .find(|(name, _)| *name == command)
            .map_or(0, |(_, code)| *code);
        Some(String::new())
    })
}

#[tokio::test(start_paused = true)]
async fn test_script_stops_on_first_failure() {
    let device = retval_device(&[("cmd1", 1), ("cmd2", 0)]);
    let script = Script::new("t", vec!["cmd1".into(), "cmd2".into()]);
    let report = ScriptRunner::default()
        .run(&device.session, &script)
        .await
        .unwrap();

    assert_eq!(report.executed(), 1);
    assert!(report.stopped_early);
    assert!(!report.succeeded());
    assert!(matches!(
        report.ensure_success(),
        Err(ShellError::ScriptCommandFailed { ref command, code: 1 }) if command == "cmd1"
    ));
    assert_eq!(device.commands(), ["cmd1", "retval"]);
}

#[tokio::test(start_paused = true)]
async fn test_script_keep_going_accumulates() {
    let device = retval_device(&[("cmd1", 1), ("cmd2", 0), ("cmd3", -22)]);
    let script = Script::new("t", vec!["cmd1".into(), "  ".into(), "cmd2".into(), "cmd3".into()])
        .stop_on_error(false);
    let report = ScriptRunner::default()
        .run(&device.session, &script)
        .await
        .unwrap();

    assert_eq!(report.executed(), 3);
    assert!(!report.stopped_early);
    let failed: Vec<_> = report.failures().map(|r| r.command.as_str()).collect();
    assert_eq!(failed, ["cmd1", "cmd3"]);
}

#[tokio::test(start_paused = true)]
async fn test_script_success() {
    let device = retval_device(&[]);
    let script = Script::new("t", vec!["kernel version".into(), "net iface".into()]);
    let report = ScriptRunner::default()
        .run(&device.session, &script)
        .await
        .unwrap();
    assert!(report.succeeded());
    assert_eq!(report.unparsed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_one_script_at_a_time() {
    let device = retval_device(&[]);
    let script = Script::new("t", vec!["a".into()]);
    let runner = ScriptRunner::default();
    let (first, second) = tokio::join!(
        runner.run(&device.session, &script),
        runner.run(&device.session, &script)
    );
    assert!(first.is_ok());
    assert!(matches!(second, Err(ShellError::ScriptInProgress)));
    assert!(!runner.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_empty_script_rejected() {
    let device = retval_device(&[]);
    let script = Script::new("t", vec!["".into(), "   ".into()]);
    assert!(matches!(
        ScriptRunner::default().run(&device.session, &script).await,
        Err(ShellError::EmptyScript)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_matchers_on_live_stream() {
    let watchers = Watchers::shared();
    {
        let mut counters = watchers.counters();
        counters.add(CounterKind::Literal(LiteralCounter::new("ERR")), Scope::All);
        counters.add(
            CounterKind::Signal(SignalCounter::new("OK", "FAIL")),
            Scope::All,
        );
        counters.add(
            CounterKind::Slicer(FieldSlicer::new("ID:", "\n")),
            Scope::All,
        );
    }
    let device = FakeDevice::with_watchers(watchers.clone(), |_| None);
    device.emit("xx-E");
    device.emit("RR-yy-ERR");
    device.emit("...FAILOK");
    device.emit("noise ID:42\n");
    settle().await;

    let counters = watchers.counters();
    let kinds: Vec<_> = counters.iter().map(|c| &c.kind).collect();
    match kinds[0] {
        CounterKind::Literal(c) => assert_eq!(c.count, 2),
        other => panic!("unexpected {other:?}"),
    }
    match kinds[1] {
        CounterKind::Signal(c) => assert_eq!(c.state(), SignalState::Negative),
        other => panic!("unexpected {other:?}"),
    }
    match kinds[2] {
        CounterKind::Slicer(c) => assert_eq!(c.extracted_value.as_deref(), Some("42")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_trigger_answers_device() {
    let watchers = Watchers::shared();
    watchers.triggers().add("login:", "root");
    let device = FakeDevice::with_watchers(watchers, |_| Some(String::new()));

    device.emit("\r\nlog");
    device.emit("in: ");
    settle().await;
    assert_eq!(device.commands(), ["root"]);
}

#[tokio::test(start_paused = true)]
async fn test_triggers_suspended_during_capture() {
    let watchers = Watchers::shared();
    watchers.triggers().add("login:", "root");
    let device = FakeDevice::with_watchers(watchers, |_| Some(String::new()));

    let capture = device.session.begin_capture();
    device.emit("login: ");
    settle().await;
    device.session.end_capture();
    assert_eq!(capture.text(), "login: ");
    assert!(device.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_repeat_preserves_typed_input() {
    let device = FakeDevice::start(|_| Some(String::new()));
    device.session.type_keys("kern").await.unwrap();

    let mut scheduler = Scheduler::default();
    let id = scheduler
        .add("stats", "net stats", Duration::from_secs(5))
        .unwrap();
    scheduler.start(&id, &device.session).unwrap();
    settle().await;
    scheduler.stop_all();

    assert_eq!(device.commands(), ["net stats"]);
    assert_eq!(device.session.pending_input(), "kern");

    device.session.type_keys("el uptime\r").await.unwrap();
    settle().await;
    assert_eq!(device.commands(), ["net stats", "kernel uptime"]);
}
