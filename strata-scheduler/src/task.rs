/// A unit of work run to completion by one worker thread.
///
/// Tasks report failures through their own channels (a pipeline records the
/// first error it sees); the scheduler only guarantees that every enqueued
/// task is executed once.
pub trait Task: Send {
    fn execute(self: Box<Self>);
}

impl<F> Task for F
where
    F: FnOnce() + Send,
{
    fn execute(self: Box<Self>) {
        (*self)()
    }
}

pub type BoxedTask = Box<dyn Task + 'static>;
