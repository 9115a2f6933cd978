/// Notification sent to an optional observer of a reader or writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenerEvent {
    /// The instance entered the Error state; carries the rendered error.
    Exception { message: String },
    /// The payload was fully written or read.
    Completed,
}

/// Observer injected at construction.
pub type Listener = Box<dyn FnMut(ListenerEvent) + Send>;

/// Helper for state machines holding an optional listener.
pub fn notify(listener: &mut Option<Listener>, event: ListenerEvent) {
    if let Some(listener) = listener.as_mut() {
        listener(event);
    }
}
