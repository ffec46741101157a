use std::thread;

/// Abstraction over the unit of execution used for long running tasks.
///
/// The network runtime hands one task per accepted connection to the spawner
/// and the actor system hands one task per actor, so the hosting process
/// decides how tasks map onto threads.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, name: &str, task: Box<dyn FnOnce() + Send>);
}

/// Default spawner backed by named OS threads.
pub struct ThreadSpawner;

impl TaskSpawner for ThreadSpawner {
    fn spawn(&self, name: &str, task: Box<dyn FnOnce() + Send>) {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(task)
            .expect("Task thread spawn failed");
    }
}
