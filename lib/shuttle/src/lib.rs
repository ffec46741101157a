//! Supervised actor runtime backing long lived stateful session workloads.
//!
//! An [`system::ActorSystem`] owns a registry of named actors. Each actor is
//! a single threaded state machine fed by a mailbox and driven by one task;
//! failures inside the message handler are routed through the actor's
//! supervision strategy rather than tearing the process down.

#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod actor;
pub mod dead_letters;
pub mod mailbox;
pub mod system;

use std::any::Any;

/// A message in flight. Actors downcast to the concrete types they handle.
pub type Msg = Box<dyn Any + Send>;

pub use crate::actor::{Actor, ActorContext, ActorError, Handled, Props, SupervisionStrategy};
pub use crate::dead_letters::{DeadLetter, DeadLetterReason};
pub use crate::mailbox::{MailboxConfig, OverflowPolicy};
pub use crate::system::{ActorSystem, PoisonPill, TellError};
