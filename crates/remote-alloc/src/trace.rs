//! Allocation trace events.
//!
//! Every region create/destroy and every alloc/free is reported to a
//! [`TraceSink`]. Sinks are fire-and-forget: they cannot fail or veto the
//! operation that produced the event.

/// Kind of a [`TraceEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, derive_more::IsVariant)]
pub enum TraceKind {
    #[display("create")]
    Create,
    #[display("destroy")]
    Destroy,
    #[display("alloc")]
    Alloc,
    #[display("free")]
    Free,
}

/// One traced operation.
///
/// For `Create` and `Destroy`, `offset` and `size` are the region's base
/// offset and maximum size. For `Alloc` and `Free` they describe the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent<'a> {
    pub kind: TraceKind,
    pub offset: u32,
    pub size: u32,
    /// Name of the region the event belongs to.
    pub name: &'a str,
}

/// Receiver of [`TraceEvent`]s.
pub trait TraceSink {
    fn record(&mut self, event: &TraceEvent<'_>);
}

impl<T> TraceSink for &mut T
where
    T: TraceSink + ?Sized,
{
    fn record(&mut self, event: &TraceEvent<'_>) {
        (**self).record(event);
    }
}

/// Forwards events to [`tracing`] at `TRACE` level, under the
/// `remote_alloc::trace` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&mut self, event: &TraceEvent<'_>) {
        tracing::trace!(
            target: "remote_alloc::trace",
            kind = %event.kind,
            offset = event.offset,
            size = event.size,
            region = event.name,
        );
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn record(&mut self, _event: &TraceEvent<'_>) {}
}
