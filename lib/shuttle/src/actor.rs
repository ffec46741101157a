use crate::mailbox::MailboxConfig;
use crate::system::ActorSystem;
use crate::Msg;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use weft::logging;

/// Cause of a failed message delivery, handed to the supervision hooks.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ActorError {
    reason: String,
}

impl ActorError {
    pub fn new<R: Into<String>>(reason: R) -> ActorError {
        ActorError {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Builds an error out of a captured panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> ActorError {
        let reason = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "opaque panic payload".to_string()
        };

        ActorError { reason }
    }
}

impl fmt::Display for ActorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "actor failure: {}", self.reason)
    }
}

/// Result of a delivery attempt. `Unhandled` returns the message so the
/// runtime can record it as a dead letter.
pub enum Handled {
    Done,
    Unhandled(Msg),
}

/// A single threaded state machine fed by a mailbox.
///
/// `on_msg` is the only required method. The lifecycle hooks default to
/// no-ops and fire around actor startup, stop and supervised restarts.
pub trait Actor: Send {
    fn on_msg(&mut self, msg: Msg, ctx: &mut ActorContext) -> Result<Handled, ActorError>;

    fn pre_start(&mut self, _ctx: &mut ActorContext) {}

    fn post_stop(&mut self, _ctx: &mut ActorContext) {}

    fn pre_restart(&mut self, _cause: &ActorError, _ctx: &mut ActorContext) {}

    fn post_restart(&mut self, _cause: &ActorError, _ctx: &mut ActorContext) {}
}

/// Per-delivery context handed to actor code.
pub struct ActorContext<'a> {
    pub name: &'a str,
    pub log: &'a logging::Logger,
    system: &'a ActorSystem,
}

impl<'a> ActorContext<'a> {
    pub(crate) fn new(
        name: &'a str,
        log: &'a logging::Logger,
        system: &'a ActorSystem,
    ) -> ActorContext<'a> {
        ActorContext { name, log, system }
    }

    /// The owning actor system, for messaging other actors.
    pub fn system(&self) -> &ActorSystem {
        self.system
    }
}

/// Policy governing what happens to an actor whose delivery fails.
#[derive(Copy, Clone)]
pub enum SupervisionStrategy {
    /// Discard the instance and rebuild it from props, keeping the mailbox.
    Restart,
    /// Stop the actor and remove its registration.
    Stop,
    /// Restart with an exponentially growing delay, optionally capping the
    /// number of attempts.
    RestartWithBackoff {
        min: Duration,
        max: Duration,
        max_retries: Option<u32>,
    },
}

impl SupervisionStrategy {
    /// Delay before a backoff restart: `min * 2^attempt`, capped at `max`.
    pub(crate) fn backoff_delay(min: Duration, max: Duration, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::max_value());
        min.checked_mul(factor).map_or(max, |delay| delay.min(max))
    }
}

/// Recipe for building an actor: a factory closure plus mailbox and
/// supervision configuration. Restarts re-invoke the factory.
pub struct Props {
    factory: Box<dyn Fn() -> Box<dyn Actor> + Send + Sync>,
    mailbox: MailboxConfig,
    strategy: SupervisionStrategy,
}

impl Props {
    pub fn new<F, A>(factory: F) -> Props
    where
        F: Fn() -> A + Send + Sync + 'static,
        A: Actor + 'static,
    {
        Props {
            factory: Box::new(move || Box::new(factory())),
            mailbox: MailboxConfig::Unbounded,
            strategy: SupervisionStrategy::Restart,
        }
    }

    pub fn with_mailbox(mut self, mailbox: MailboxConfig) -> Props {
        self.mailbox = mailbox;
        self
    }

    pub fn with_strategy(mut self, strategy: SupervisionStrategy) -> Props {
        self.strategy = strategy;
        self
    }

    pub(crate) fn mailbox_config(&self) -> MailboxConfig {
        self.mailbox.clone()
    }

    pub(crate) fn strategy(&self) -> SupervisionStrategy {
        self.strategy.clone()
    }

    /// Runs the factory, converting a factory panic into an error.
    pub(crate) fn instantiate(&self) -> Result<Box<dyn Actor>, ActorError> {
        panic::catch_unwind(AssertUnwindSafe(|| (self.factory)()))
            .map_err(ActorError::from_panic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let min = Duration::from_millis(100);
        let max = Duration::from_secs(2);

        assert_eq!(
            SupervisionStrategy::backoff_delay(min, max, 0),
            Duration::from_millis(100)
        );
        assert_eq!(
            SupervisionStrategy::backoff_delay(min, max, 1),
            Duration::from_millis(200)
        );
        assert_eq!(
            SupervisionStrategy::backoff_delay(min, max, 3),
            Duration::from_millis(800)
        );
        assert_eq!(SupervisionStrategy::backoff_delay(min, max, 10), max);
        assert_eq!(SupervisionStrategy::backoff_delay(min, max, 40), max);
    }

    #[test]
    fn test_error_from_panic_payloads() {
        let from_str = ActorError::from_panic(Box::new("boom"));
        assert_eq!(from_str.reason(), "boom");

        let from_string = ActorError::from_panic(Box::new("kaboom".to_string()));
        assert_eq!(from_string.reason(), "kaboom");

        let opaque = ActorError::from_panic(Box::new(42i32));
        assert_eq!(opaque.reason(), "opaque panic payload");
    }

    #[test]
    fn test_props_instantiate_captures_factory_panic() {
        struct Inert;

        impl Actor for Inert {
            fn on_msg(&mut self, _msg: crate::Msg, _ctx: &mut ActorContext) -> Result<Handled, ActorError> {
                Ok(Handled::Done)
            }
        }

        let good = Props::new(|| Inert);
        assert!(good.instantiate().is_ok());

        let bad = Props::new(|| -> Inert { panic!("constructor exploded") });
        let err = bad.instantiate().err().unwrap();
        assert_eq!(err.reason(), "constructor exploded");
    }
}
