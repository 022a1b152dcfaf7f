//! Scheduler and collector integration tests.
//!
//! Parsers here are scripted: they either resolve immediately or hand their
//! outcome to the test through a channel, so the tests control exactly when
//! each result completes.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sextant_core::{
    ActionId, BuildAction, BuildActionState, BuildActionType, File, ParseHandle, ParseResult,
    ParseSender, SourceTarget,
};
use sextant_parser::parse::{ParseStats, ResultCollector, TaskScheduler};
use sextant_parser::parser::{ParseContext, Parser, ParserRegistry};
use sextant_parser::storage::Database;

enum Mode {
    Ready(ParseResult),
    Channel(Arc<Mutex<Vec<ParseSender>>>),
}

struct ScriptedParser {
    extension: &'static str,
    mode: Mode,
    calls: Arc<AtomicUsize>,
    command_calls: Arc<AtomicUsize>,
}

impl ScriptedParser {
    fn ready(extension: &'static str, result: ParseResult) -> Self {
        Self {
            extension,
            mode: Mode::Ready(result),
            calls: Arc::new(AtomicUsize::new(0)),
            command_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn channel(extension: &'static str, senders: Arc<Mutex<Vec<ParseSender>>>) -> Self {
        Self {
            extension,
            mode: Mode::Channel(senders),
            calls: Arc::new(AtomicUsize::new(0)),
            command_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Parser for ScriptedParser {
    fn name(&self) -> &str {
        "scripted"
    }

    fn accept(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(self.extension)
    }

    fn parse(
        &self,
        _ctx: &ParseContext<'_>,
        _action: &BuildAction,
        _source: &File,
        _target: Option<&File>,
    ) -> ParseHandle {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            Mode::Ready(result) => ParseHandle::ready(*result),
            Mode::Channel(senders) => {
                let (sender, handle) = ParseHandle::channel();
                senders.lock().unwrap().push(sender);
                handle
            }
        }
    }

    fn parse_command(
        &self,
        ctx: &ParseContext<'_>,
        action: &BuildAction,
        pairs: &[SourceTarget],
    ) -> ParseHandle {
        self.command_calls.fetch_add(1, Ordering::SeqCst);
        let handles = pairs
            .iter()
            .filter_map(|pair| pair.source.as_ref().map(|s| (s, pair.target.as_ref())))
            .map(|(source, target)| self.parse(ctx, action, source, target))
            .collect();
        ParseHandle::join(handles)
    }
}

struct Harness {
    db: Arc<Database>,
    stats: Arc<ParseStats>,
    collector: Arc<ResultCollector>,
}

impl Harness {
    fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().expect("Failed to open database"));
        let stats = Arc::new(ParseStats::new());
        let collector = Arc::new(ResultCollector::new(
            Arc::clone(&db),
            Arc::clone(&stats),
            Duration::from_millis(2),
        ));
        Self {
            db,
            stats,
            collector,
        }
    }

    fn scheduler(&self, parser: Arc<dyn Parser>) -> TaskScheduler {
        let mut registry = ParserRegistry::new();
        registry.register(parser);
        TaskScheduler::new(
            Arc::clone(&self.db),
            Arc::new(registry),
            Arc::clone(&self.collector),
            Arc::clone(&self.stats),
        )
    }

    /// Record an action with the given source and target paths.
    fn action(&self, action_type: BuildActionType, sources: &[&str], targets: &[&str]) -> ActionId {
        self.db
            .transaction(|tx| {
                let action = tx.insert_action(action_type, &format!("tool {:?}", sources), "demo")?;
                for (i, path) in sources.iter().enumerate() {
                    let file = tx.get_or_create_file(path)?;
                    tx.add_action_source(action.id, file.id, i)?;
                }
                for (i, path) in targets.iter().enumerate() {
                    let file = tx.get_or_create_file(path)?;
                    tx.add_action_target(action.id, file.id, i)?;
                }
                Ok(action.id)
            })
            .expect("Failed to record action")
    }

    fn state(&self, id: ActionId) -> BuildActionState {
        self.db
            .transaction(|tx| Ok(tx.get_action(id)?.expect("action exists").state))
            .expect("Failed to read action")
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_link_and_compile_end_to_end() {
    let harness = Harness::new();
    let compile = harness.action(BuildActionType::Compile, &["/src/a.c"], &["/build/a.o"]);
    let link = harness.action(BuildActionType::Link, &["/build/a.o"], &["/build/app"]);

    let parser = Arc::new(ScriptedParser::ready("c", ParseResult::Success));
    let calls = Arc::clone(&parser.calls);
    let mut scheduler = harness.scheduler(parser);

    harness.collector.start().unwrap();
    let mut progress = Vec::new();
    let summary = scheduler
        .run(|current, total| progress.push((current, total)))
        .unwrap();
    harness.collector.stop();

    assert_eq!(summary.tasks, 2);
    assert_eq!(summary.links, 1);
    assert_eq!(summary.dispatched, 1);
    assert_eq!(progress, vec![(1, 2), (2, 2)]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(harness.state(compile), BuildActionState::Parsed);
    assert_eq!(harness.state(link), BuildActionState::Parsed);
    let totals = harness.stats.snapshot();
    assert_eq!(totals.succeeded, 2);
    assert_eq!(totals.failed, 0);
}

#[test]
fn test_sourceless_link_and_partly_unparseable_compile() {
    let harness = Harness::new();
    let link = harness.action(BuildActionType::Link, &[], &["/build/app"]);
    let compile = harness.action(
        BuildActionType::Compile,
        &["/src/a.c", "/src/grammar.y"],
        &["/build/a.o", "/build/grammar.o"],
    );

    let parser = Arc::new(ScriptedParser::ready("c", ParseResult::Success));
    let calls = Arc::clone(&parser.calls);
    let mut scheduler = harness.scheduler(parser);

    harness.collector.start().unwrap();
    let mut progress = Vec::new();
    let summary = scheduler
        .run(|current, total| progress.push((current, total)))
        .unwrap();
    harness.collector.stop();

    assert_eq!(summary.tasks, 2);
    assert_eq!(summary.links, 1);
    assert_eq!(summary.dispatched, 2);
    assert_eq!(progress, vec![(0, 2), (2, 2)]);
    // Only the .c source reaches a parser; the grammar file has none.
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(harness.state(link), BuildActionState::Parsed);
    assert_eq!(harness.state(compile), BuildActionState::Parsed);
    let totals = harness.stats.snapshot();
    assert_eq!(totals.succeeded, 3);
    assert_eq!(totals.failed, 0);
    assert_eq!(totals.partial, 0);
}

#[test]
fn test_and_join_waits_for_every_result() {
    let harness = Harness::new();
    let action = harness.action(
        BuildActionType::Compile,
        &["/src/a.c", "/src/b.c", "/src/c.c"],
        &["/build/a.o", "/build/b.o", "/build/c.o"],
    );

    let senders = Arc::new(Mutex::new(Vec::new()));
    let parser = ScriptedParser::channel("c", Arc::clone(&senders));
    let mut scheduler = harness.scheduler(Arc::new(parser));

    harness.collector.start().unwrap();
    let summary = scheduler.run(|_, _| {}).unwrap();
    assert_eq!(summary.dispatched, 3);

    let mut pending: Vec<ParseSender> = senders.lock().unwrap().drain(..).collect();
    assert_eq!(pending.len(), 3);
    pending.pop().unwrap().send(ParseResult::Success);
    pending.pop().unwrap().send(ParseResult::Fail);

    // Two of three resolved: the action must stay outstanding.
    thread::sleep(Duration::from_millis(50));
    assert!(harness.collector.is_pending(action));
    assert_eq!(harness.state(action), BuildActionState::Created);

    pending.pop().unwrap().send(ParseResult::Success);
    assert!(wait_until(Duration::from_secs(5), || !harness.collector.is_pending(action)));
    assert_eq!(harness.state(action), BuildActionState::Parsed);
    harness.collector.stop();

    let totals = harness.stats.snapshot();
    assert_eq!((totals.succeeded, totals.failed, totals.partial), (2, 1, 1));
}

#[test]
fn test_in_flight_action_is_not_rescheduled() {
    let harness = Harness::new();
    let action = harness.action(BuildActionType::Compile, &["/src/a.c"], &["/build/a.o"]);

    let senders = Arc::new(Mutex::new(Vec::new()));
    let parser = Arc::new(ScriptedParser::channel("c", Arc::clone(&senders)));
    let calls = Arc::clone(&parser.calls);
    let mut scheduler = harness.scheduler(parser);

    harness.collector.start().unwrap();
    assert_eq!(scheduler.run(|_, _| {}).unwrap().tasks, 1);
    // Still in flight: a second pass must not dispatch it again.
    assert!(harness.collector.is_pending(action));
    assert_eq!(scheduler.run(|_, _| {}).unwrap().tasks, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    for sender in senders.lock().unwrap().drain(..) {
        sender.send(ParseResult::Success);
    }
    harness.collector.stop();
    assert_eq!(harness.state(action), BuildActionState::Parsed);

    // Terminal now: nothing left to schedule.
    assert_eq!(scheduler.run(|_, _| {}).unwrap().tasks, 0);
}

#[test]
fn test_stop_drains_everything_outstanding() {
    let harness = Harness::new();
    let actions: Vec<ActionId> = (0..10)
        .map(|i| {
            let source = format!("/src/f{}.c", i);
            let target = format!("/build/f{}.o", i);
            harness.action(BuildActionType::Compile, &[&source], &[&target])
        })
        .collect();

    let senders = Arc::new(Mutex::new(Vec::new()));
    let parser = ScriptedParser::channel("c", Arc::clone(&senders));
    let mut scheduler = harness.scheduler(Arc::new(parser));

    harness.collector.start().unwrap();
    scheduler.run(|_, _| {}).unwrap();

    let outstanding: Vec<ParseSender> = senders.lock().unwrap().drain(..).collect();
    let producer = thread::spawn(move || {
        for sender in outstanding {
            thread::sleep(Duration::from_millis(3));
            sender.send(ParseResult::Success);
        }
    });

    harness.collector.stop();
    producer.join().unwrap();

    assert_eq!(harness.collector.pending_count(), 0);
    for action in actions {
        assert_eq!(harness.state(action), BuildActionState::Parsed);
    }
    assert_eq!(harness.stats.snapshot().succeeded, 10);
}

#[test]
fn test_missing_source_skips_and_missing_parser_succeeds() {
    let harness = Harness::new();
    let broken = harness.db
        .transaction(|tx| {
            let action = tx.insert_action(BuildActionType::Compile, "cc broken", "demo")?;
            tx.add_action_source(action.id, 424242, 0)?;
            Ok(action.id)
        })
        .unwrap();
    let unparsed = harness.action(BuildActionType::Interpret, &["/tools/gen.sh"], &[]);

    let parser = Arc::new(ScriptedParser::ready("c", ParseResult::Success));
    let calls = Arc::clone(&parser.calls);
    let mut scheduler = harness.scheduler(parser);

    harness.collector.start().unwrap();
    let summary = scheduler.run(|_, _| {}).unwrap();
    harness.collector.stop();

    assert_eq!(summary.skipped, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.state(broken), BuildActionState::Skipped);
    assert_eq!(harness.state(unparsed), BuildActionState::Parsed);

    let totals = harness.stats.snapshot();
    assert_eq!(totals.failed, 1);
    assert_eq!(totals.succeeded, 1);
}

#[test]
fn test_whole_command_dispatch() {
    let harness = Harness::new();
    let multi = harness.action(
        BuildActionType::Compile,
        &["/src/a.c", "/src/b.c"],
        &["/build/lib.a"],
    );
    let single = harness.action(BuildActionType::Compile, &["/src/c.c"], &["/build/c.o"]);

    let parser = Arc::new(ScriptedParser::ready("c", ParseResult::Success));
    let calls = Arc::clone(&parser.calls);
    let command_calls = Arc::clone(&parser.command_calls);
    let mut scheduler = harness.scheduler(parser).with_whole_command(true);

    harness.collector.start().unwrap();
    let summary = scheduler.run(|_, _| {}).unwrap();
    harness.collector.stop();

    // One handle for the two-source action, one for the single-source one.
    assert_eq!(summary.dispatched, 2);
    assert_eq!(command_calls.load(Ordering::SeqCst), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(harness.state(multi), BuildActionState::Parsed);
    assert_eq!(harness.state(single), BuildActionState::Parsed);
}

#[test]
fn test_process_resolves_synchronously() {
    let harness = Harness::new();
    let action = harness.action(BuildActionType::Compile, &["/src/a.c"], &["/build/a.o"]);
    let record = harness
        .db
        .transaction(|tx| Ok(tx.get_action(action)?.unwrap()))
        .unwrap();

    let (sender, handle) = ParseHandle::channel();
    let producer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        sender.send(ParseResult::Deferred);
    });
    harness.collector.process(sextant_parser::parse::AsyncBuildAction::new(
        record,
        vec![sextant_parser::parse::AsyncResult {
            handle,
            path: "/src/a.c".into(),
            language: Some("c".into()),
        }],
    ));
    producer.join().unwrap();

    assert_eq!(harness.state(action), BuildActionState::Parsed);
    assert_eq!(harness.stats.snapshot().deferred, 1);
}
