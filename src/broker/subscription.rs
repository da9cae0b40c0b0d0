use crate::subject::Subject;
use log::debug;
use tokio::task::JoinHandle;

/// Handle to a bound resource
///
/// The resource is served by a background task until [`cancel`](Subscription::cancel) is
/// called or the transport ends the underlying stream. Dropping the handle detaches the
/// task, it keeps serving for the lifetime of the runtime.
#[derive(Debug)]
pub struct Subscription {
    subject: Subject,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(subject: Subject, handle: JoinHandle<()>) -> Self {
        Self { subject, handle }
    }

    /// Canonical subject the resource is bound to
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Stops serving the resource. Messages currently being processed are abandoned.
    pub fn cancel(self) {
        debug!("Cancelling subscription on {}", self.subject);
        self.handle.abort();
    }

    /// Waits until the transport ends the subscription
    pub async fn closed(self) {
        if let Err(e) = self.handle.await {
            debug!("Subscription on {} terminated: {}", self.subject, e);
        }
    }
}
