use crate::actor::{Actor, ActorContext, ActorError, Handled, Props, SupervisionStrategy};
use crate::dead_letters::{DeadLetter, DeadLetterLog, DeadLetterReason, RETENTION};
use crate::mailbox::{Enqueued, Mailbox, PushError};
use crate::Msg;
use crossbeam_channel::{bounded, Receiver, Sender};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use weft::exec::TaskSpawner;
use weft::logging;

/// Orderly stop request. The actor processes every message queued ahead of
/// the pill, then runs `post_stop` and deregisters.
pub struct PoisonPill;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TellError {
    /// The system has been shut down; no further sends are accepted.
    ShutDown,
    /// The name is empty.
    InvalidName,
    /// No props are registered under the name.
    Unregistered,
    /// Bounded mailbox with the `Fail` overflow policy is full.
    MailboxOverflow,
}

struct RunningActor {
    mailbox: Arc<Mailbox>,
    done: Receiver<()>,
}

struct ActorCell {
    props: Arc<Props>,
    running: Option<RunningActor>,
}

struct Shared {
    registry: Mutex<HashMap<String, ActorCell>>,
    dead_letters: DeadLetterLog,
    spawner: Arc<dyn TaskSpawner>,
    shutdown: AtomicBool,
    log: logging::Logger,
}

/// Registry of named actors plus the dead letter log and shutdown flag.
///
/// Cloning is cheap and yields a handle onto the same system.
#[derive(Clone)]
pub struct ActorSystem {
    shared: Arc<Shared>,
}

impl ActorSystem {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        spawner: Arc<dyn TaskSpawner>,
        log: L,
    ) -> ActorSystem {
        let system_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        ActorSystem {
            shared: Arc::new(Shared {
                registry: Mutex::new(HashMap::new()),
                dead_letters: DeadLetterLog::new(RETENTION),
                spawner,
                shutdown: AtomicBool::new(false),
                log: system_log,
            }),
        }
    }

    /// Records props under the name. The actor itself is built lazily on the
    /// first `tell`. Names must be unique within the system.
    pub fn register(&self, name: &str, props: Props) {
        let mut registry = self.shared.registry.lock();

        if registry.contains_key(name) {
            panic!("Actor {} is already registered", name);
        }

        registry.insert(
            name.to_string(),
            ActorCell {
                props: Arc::new(props),
                running: None,
            },
        );
    }

    /// True if props are currently registered under the name.
    pub fn is_registered(&self, name: &str) -> bool {
        self.shared.registry.lock().contains_key(name)
    }

    /// Delivers a message to the named actor, creating it from its props if
    /// it is not running yet.
    pub fn tell(&self, name: &str, msg: Msg) -> Result<(), TellError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(TellError::ShutDown);
        }

        if name.is_empty() {
            return Err(TellError::InvalidName);
        }

        // Resolve (and lazily start) the actor under the registry lock, but
        // release it before touching the mailbox: the actor task takes the
        // same locks in the opposite order when it stops.
        let mailbox = {
            let mut registry = self.shared.registry.lock();

            let cell = match registry.get_mut(name) {
                Some(cell) => cell,
                None => {
                    self.shared
                        .dead_letters
                        .record(name, msg, DeadLetterReason::ActorTerminated);
                    return Err(TellError::Unregistered);
                }
            };

            if cell.running.is_none() {
                let instance = match cell.props.instantiate() {
                    Ok(instance) => instance,
                    Err(err) => {
                        logging::error!(self.shared.log, "actor instantiation failed";
                                        "actor" => name,
                                        "reason" => err.reason());
                        self.shared
                            .dead_letters
                            .record(name, msg, DeadLetterReason::ActorTerminated);
                        return Ok(());
                    }
                };

                let mailbox = Arc::new(Mailbox::new(cell.props.mailbox_config()));
                let (done_tx, done_rx) = bounded(1);

                cell.running = Some(RunningActor {
                    mailbox: mailbox.clone(),
                    done: done_rx,
                });

                self.start_actor(name.to_string(), instance, mailbox, cell.props.clone(), done_tx);
            }

            cell.running
                .as_ref()
                .expect("Actor must be running at this point")
                .mailbox
                .clone()
        };

        match mailbox.push(msg) {
            Ok(Enqueued::Accepted) => Ok(()),
            Ok(Enqueued::Displaced(lost)) => {
                self.shared
                    .dead_letters
                    .record(name, lost, DeadLetterReason::Delivery);
                Ok(())
            }
            Err(PushError::Overflow(_)) => Err(TellError::MailboxOverflow),
            Err(PushError::Closed(lost)) => {
                // The actor stopped between lookup and push.
                self.shared
                    .dead_letters
                    .record(name, lost, DeadLetterReason::ActorTerminated);
                Ok(())
            }
        }
    }

    /// Dequeue up to `limit` dead letters, oldest first.
    pub fn dead_letters(&self, limit: usize) -> Vec<DeadLetter> {
        self.shared.dead_letters.take(limit)
    }

    pub fn dead_letter_count(&self) -> usize {
        self.shared.dead_letters.len()
    }

    /// Marks the system shut down and closes every running mailbox. The
    /// operation is idempotent; undelivered messages become dead letters.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        logging::info!(self.shared.log, "actor system shutting down");

        let mailboxes: Vec<(String, Arc<Mailbox>)> = {
            let registry = self.shared.registry.lock();
            registry
                .iter()
                .filter_map(|(name, cell)| {
                    cell.running
                        .as_ref()
                        .map(|running| (name.clone(), running.mailbox.clone()))
                })
                .collect()
        };

        for (name, mailbox) in mailboxes {
            for lost in mailbox.close() {
                self.shared
                    .dead_letters
                    .record(&name, lost, DeadLetterReason::ActorTerminated);
            }
        }
    }

    /// Waits for every running actor to terminate. Returns false if the
    /// timeout elapses first. Call `shutdown` beforehand.
    pub fn shutdown_await(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        let receivers: Vec<Receiver<()>> = {
            let registry = self.shared.registry.lock();
            registry
                .values()
                .filter_map(|cell| cell.running.as_ref().map(|running| running.done.clone()))
                .collect()
        };

        for receiver in receivers {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_else(|| Duration::from_millis(0));

            match receiver.recv_timeout(remaining) {
                Ok(()) => (),
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => (),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => return false,
            }
        }

        true
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    fn start_actor(
        &self,
        name: String,
        instance: Box<dyn Actor>,
        mailbox: Arc<Mailbox>,
        props: Arc<Props>,
        done: Sender<()>,
    ) {
        let shared = self.shared.clone();
        let task_name = format!("actor-{}", name);

        self.shared.spawner.spawn(
            &task_name,
            Box::new(move || {
                run_actor(shared, name, instance, mailbox, props, done);
            }),
        );
    }
}

enum StopKind {
    /// PoisonPill or a closed mailbox.
    Orderly,
    /// Supervision decided to stop after a failure.
    Failed,
}

/// Delivery loop for a single actor. Runs on its own task until the actor
/// stops, then deregisters it and acknowledges through `done`.
fn run_actor(
    shared: Arc<Shared>,
    name: String,
    mut instance: Box<dyn Actor>,
    mailbox: Arc<Mailbox>,
    props: Arc<Props>,
    done: Sender<()>,
) {
    let system = ActorSystem {
        shared: shared.clone(),
    };
    let log = shared.log.new(logging::o!("actor" => name.clone()));
    let strategy = props.strategy();

    {
        let mut ctx = ActorContext::new(&name, &log, &system);
        if panic::catch_unwind(AssertUnwindSafe(|| instance.pre_start(&mut ctx))).is_err() {
            logging::error!(log, "pre_start panicked, stopping actor");
            stop_actor(&shared, &name, &mailbox, &mut instance, &log, &system);
            let _ = done.send(());
            return;
        }
    }

    logging::debug!(log, "actor started");

    let mut attempt: u32 = 0;

    let stop_kind = loop {
        let msg = match mailbox.pop_wait(None) {
            Some(msg) => msg,
            None => break StopKind::Orderly,
        };

        if msg.is::<PoisonPill>() {
            break StopKind::Orderly;
        }

        let mut ctx = ActorContext::new(&name, &log, &system);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| instance.on_msg(msg, &mut ctx)));

        let cause = match outcome {
            Ok(Ok(Handled::Done)) => continue,
            Ok(Ok(Handled::Unhandled(unhandled))) => {
                logging::debug!(log, "unhandled message");
                shared
                    .dead_letters
                    .record(&name, unhandled, DeadLetterReason::UnhandledMessage);
                continue;
            }
            Ok(Err(err)) => err,
            Err(payload) => ActorError::from_panic(payload),
        };

        logging::warn!(log, "message delivery failed"; "reason" => cause.reason());

        match strategy {
            SupervisionStrategy::Stop => break StopKind::Failed,
            SupervisionStrategy::Restart => {
                match restart_actor(&mut instance, &props, &cause, &name, &log, &system) {
                    Ok(()) => (),
                    Err(()) => break StopKind::Failed,
                }
            }
            SupervisionStrategy::RestartWithBackoff {
                min,
                max,
                max_retries,
            } => {
                if let Some(max_retries) = max_retries {
                    if attempt >= max_retries {
                        logging::warn!(log, "restart attempts exhausted"; "attempts" => attempt);
                        break StopKind::Failed;
                    }
                }

                let delay = SupervisionStrategy::backoff_delay(min, max, attempt);
                logging::debug!(log, "backing off before restart";
                                "attempt" => attempt,
                                "delay_ms" => delay.as_millis() as u64);
                thread::sleep(delay);
                attempt += 1;

                match restart_actor(&mut instance, &props, &cause, &name, &log, &system) {
                    Ok(()) => (),
                    Err(()) => break StopKind::Failed,
                }
            }
        }
    };

    match stop_kind {
        StopKind::Orderly => logging::debug!(log, "actor stopping"),
        StopKind::Failed => logging::warn!(log, "actor stopped by supervision"),
    }

    stop_actor(&shared, &name, &mailbox, &mut instance, &log, &system);
    let _ = done.send(());
}

/// Swap in a fresh instance from props, running the restart hooks around it.
fn restart_actor(
    instance: &mut Box<dyn Actor>,
    props: &Props,
    cause: &ActorError,
    name: &str,
    log: &logging::Logger,
    system: &ActorSystem,
) -> Result<(), ()> {
    let mut ctx = ActorContext::new(name, log, system);

    let hook =
        panic::catch_unwind(AssertUnwindSafe(|| instance.pre_restart(cause, &mut ctx)));
    if hook.is_err() {
        logging::error!(log, "pre_restart panicked");
    }

    match props.instantiate() {
        Ok(fresh) => {
            *instance = fresh;
            let mut ctx = ActorContext::new(name, log, system);
            if panic::catch_unwind(AssertUnwindSafe(|| instance.post_restart(cause, &mut ctx)))
                .is_err()
            {
                logging::error!(log, "post_restart panicked");
            }
            logging::info!(log, "actor restarted"; "cause" => cause.reason());
            Ok(())
        }
        Err(err) => {
            logging::error!(log, "re-instantiation failed, stopping actor";
                            "reason" => err.reason());
            Err(())
        }
    }
}

/// Common stop sequence: post_stop hook, mailbox drain to dead letters,
/// registry removal.
fn stop_actor(
    shared: &Arc<Shared>,
    name: &str,
    mailbox: &Arc<Mailbox>,
    instance: &mut Box<dyn Actor>,
    log: &logging::Logger,
    system: &ActorSystem,
) {
    {
        let mut ctx = ActorContext::new(name, log, system);
        if panic::catch_unwind(AssertUnwindSafe(|| instance.post_stop(&mut ctx))).is_err() {
            logging::error!(log, "post_stop panicked");
        }
    }

    for lost in mailbox.close() {
        shared
            .dead_letters
            .record(name, lost, DeadLetterReason::ActorTerminated);
    }

    shared.registry.lock().remove(name);

    logging::debug!(log, "actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{MailboxConfig, OverflowPolicy};
    use std::sync::atomic::AtomicUsize;
    use weft::exec::ThreadSpawner;

    fn system() -> ActorSystem {
        ActorSystem::new(Arc::new(ThreadSpawner), None)
    }

    /// Test actor counting string messages, failing on "boom" and recording
    /// lifecycle hook invocations into a shared journal.
    struct Recorder {
        counter: Arc<AtomicUsize>,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn props(counter: Arc<AtomicUsize>, journal: Arc<Mutex<Vec<String>>>) -> Props {
            Props::new(move || Recorder {
                counter: counter.clone(),
                journal: journal.clone(),
            })
        }
    }

    impl Actor for Recorder {
        fn on_msg(&mut self, msg: Msg, _ctx: &mut ActorContext) -> Result<Handled, ActorError> {
            match msg.downcast::<String>() {
                Ok(text) => {
                    if *text == "boom" {
                        return Err(ActorError::new("boom"));
                    }
                    self.counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Handled::Done)
                }
                Err(other) => Ok(Handled::Unhandled(other)),
            }
        }

        fn post_stop(&mut self, _ctx: &mut ActorContext) {
            self.journal.lock().push("post_stop".to_string());
        }

        fn pre_restart(&mut self, cause: &ActorError, _ctx: &mut ActorContext) {
            self.journal
                .lock()
                .push(format!("pre_restart:{}", cause.reason()));
        }

        fn post_restart(&mut self, cause: &ActorError, _ctx: &mut ActorContext) {
            self.journal
                .lock()
                .push(format!("post_restart:{}", cause.reason()));
        }
    }

    fn text(msg: &str) -> Msg {
        Box::new(msg.to_string())
    }

    fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            if Instant::now() > deadline {
                panic!("Timed out waiting for {}", what);
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_fifo_delivery_from_single_sender() {
        let system = system();
        let counter = Arc::new(AtomicUsize::new(0));
        let journal = Arc::new(Mutex::new(Vec::new()));

        system.register("echo", Recorder::props(counter.clone(), journal));

        for _ in 0..50 {
            system.tell("echo", text("tick")).unwrap();
        }

        wait_for("all messages", || counter.load(Ordering::SeqCst) == 50);
    }

    #[test]
    fn test_restart_strategy_survives_failure() {
        let system = system();
        let counter = Arc::new(AtomicUsize::new(0));
        let journal = Arc::new(Mutex::new(Vec::new()));

        system.register("worker", Recorder::props(counter.clone(), journal.clone()));

        system.tell("worker", text("a")).unwrap();
        system.tell("worker", text("a")).unwrap();
        system.tell("worker", text("boom")).unwrap();
        system.tell("worker", text("a")).unwrap();

        wait_for("counter", || counter.load(Ordering::SeqCst) == 3);

        let journal = journal.lock();
        assert_eq!(
            journal
                .iter()
                .filter(|entry| entry.as_str() == "pre_restart:boom")
                .count(),
            1
        );
        assert_eq!(
            journal
                .iter()
                .filter(|entry| entry.as_str() == "post_restart:boom")
                .count(),
            1
        );
    }

    #[test]
    fn test_poison_pill_runs_post_stop_once() {
        let system = system();
        let counter = Arc::new(AtomicUsize::new(0));
        let journal = Arc::new(Mutex::new(Vec::new()));

        system.register("doomed", Recorder::props(counter.clone(), journal.clone()));

        system.tell("doomed", text("a")).unwrap();
        system.tell("doomed", Box::new(PoisonPill)).unwrap();

        wait_for("deregistration", || !system.is_registered("doomed"));

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let journal = journal.lock();
        assert_eq!(
            journal
                .iter()
                .filter(|entry| entry.as_str() == "post_stop")
                .count(),
            1
        );
    }

    #[test]
    fn test_stop_strategy_dead_letters_remaining_mailbox() {
        let system = system();
        let counter = Arc::new(AtomicUsize::new(0));
        let journal = Arc::new(Mutex::new(Vec::new()));

        let props = Recorder::props(counter.clone(), journal)
            .with_strategy(SupervisionStrategy::Stop);
        system.register("fragile", props);

        system.tell("fragile", text("boom")).unwrap();

        wait_for("deregistration", || !system.is_registered("fragile"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unhandled_message_becomes_dead_letter() {
        let system = system();
        let counter = Arc::new(AtomicUsize::new(0));
        let journal = Arc::new(Mutex::new(Vec::new()));

        system.register("typed", Recorder::props(counter, journal));

        system.tell("typed", Box::new(42u32)).unwrap();

        wait_for("dead letter", || system.dead_letter_count() == 1);

        let letters = system.dead_letters(10);
        assert_eq!(letters[0].reason, DeadLetterReason::UnhandledMessage);
        assert_eq!(letters[0].actor, "typed");
    }

    #[test]
    fn test_tell_unregistered_is_error_and_dead_letter() {
        let system = system();

        let result = system.tell("ghost", text("hello"));

        assert_eq!(result, Err(TellError::Unregistered));
        assert_eq!(system.dead_letter_count(), 1);
    }

    #[test]
    fn test_instantiation_failure_drops_message() {
        struct Unbuildable;
        impl Actor for Unbuildable {
            fn on_msg(&mut self, _msg: Msg, _ctx: &mut ActorContext) -> Result<Handled, ActorError> {
                Ok(Handled::Done)
            }
        }

        let system = system();
        system.register(
            "broken",
            Props::new(|| -> Unbuildable { panic!("no can do") }),
        );

        let result = system.tell("broken", text("hello"));

        assert_eq!(result, Ok(()));
        assert_eq!(system.dead_letter_count(), 1);
        assert_eq!(
            system.dead_letters(1)[0].reason,
            DeadLetterReason::ActorTerminated
        );
    }

    #[test]
    fn test_bounded_fail_mailbox_overflows_to_caller() {
        struct Sleeper {
            started: crossbeam_channel::Sender<()>,
        }
        impl Actor for Sleeper {
            fn on_msg(&mut self, _msg: Msg, _ctx: &mut ActorContext) -> Result<Handled, ActorError> {
                let _ = self.started.send(());
                thread::sleep(Duration::from_millis(250));
                Ok(Handled::Done)
            }
        }

        let system = system();
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        system.register(
            "slow",
            Props::new(move || Sleeper {
                started: started_tx.clone(),
            })
            .with_mailbox(MailboxConfig::Bounded {
                capacity: 1,
                policy: OverflowPolicy::Fail,
            }),
        );

        // Wait until the worker has dequeued the first message, then fill
        // the single mailbox slot; one more must overflow.
        system.tell("slow", text("a")).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        system.tell("slow", text("b")).unwrap();

        assert_eq!(system.tell("slow", text("c")), Err(TellError::MailboxOverflow));
    }

    #[test]
    fn test_shutdown_is_idempotent_and_rejects_tells() {
        let system = system();
        let counter = Arc::new(AtomicUsize::new(0));
        let journal = Arc::new(Mutex::new(Vec::new()));

        system.register("echo", Recorder::props(counter, journal));
        system.tell("echo", text("a")).unwrap();

        system.shutdown();
        system.shutdown();

        assert!(system.is_shut_down());
        assert_eq!(system.tell("echo", text("b")), Err(TellError::ShutDown));
        assert!(system.shutdown_await(Duration::from_secs(5)));
    }

    #[test]
    fn test_backoff_strategy_stops_after_max_retries() {
        let system = system();
        let counter = Arc::new(AtomicUsize::new(0));
        let journal = Arc::new(Mutex::new(Vec::new()));

        let props = Recorder::props(counter, journal).with_strategy(
            SupervisionStrategy::RestartWithBackoff {
                min: Duration::from_millis(1),
                max: Duration::from_millis(4),
                max_retries: Some(2),
            },
        );
        system.register("flaky", props);

        for _ in 0..3 {
            system.tell("flaky", text("boom")).unwrap();
        }

        wait_for("supervised stop", || !system.is_registered("flaky"));
    }
}
