// ABOUTME: Callback trait aliases for the two upward notifications a session dispatches

/// Invoked for every inbound `Request`. Returning `Some(value)` schedules a
/// `Response` with that payload; returning `None` leaves the request
/// unanswered (the caller never learns the peer chose not to reply).
pub trait OnRequest<V>: Fn(V) -> Option<V> + Send + Sync {}
impl<V, F: Fn(V) -> Option<V> + Send + Sync> OnRequest<V> for F {}

/// Invoked for every inbound `Push`. No reply is possible.
pub trait OnPush<V>: Fn(V) + Send + Sync {}
impl<V, F: Fn(V) + Send + Sync> OnPush<V> for F {}
