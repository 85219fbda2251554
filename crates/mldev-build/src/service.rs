//! Build service abstraction
//!
//! Everything the orchestration needs from the external build service.
//! [`crate::client::OcClient`] implements it on top of the `oc` CLI; tests
//! implement it with scripted fakes.

use crate::definition::{BuildDefinition, BuildHandle};
use crate::error::Result;
use crate::phase::BuildPhase;
use async_trait::async_trait;

#[async_trait]
pub trait BuildService: Send + Sync {
    /// Create or update the BuildConfig; returns its name
    async fn submit(&self, definition: &BuildDefinition) -> Result<String>;

    /// Start a build from a BuildConfig; returns the build instance name
    async fn start(&self, definition_name: &str) -> Result<String>;

    /// Full image reference bound to `tag` in an ImageStream
    async fn resolve_image_reference(&self, stream: &str, tag: &str) -> Result<String>;

    /// Current phase of a build instance
    async fn phase(&self, build_name: &str) -> Result<BuildPhase>;

    /// Complete log snapshot of a build instance
    async fn logs(&self, build_name: &str) -> Result<String>;

    /// Start streaming the build log
    async fn follow_logs(&self, build_name: &str) -> Result<Box<dyn LogTail>>;

    /// Submit a definition and start its first build
    async fn launch(&self, definition: &BuildDefinition) -> Result<BuildHandle> {
        let definition_name = self.submit(definition).await?;
        let build_name = self.start(&definition_name).await?;

        tracing::info!("Started build {} from {}", build_name, definition_name);

        Ok(BuildHandle {
            definition_name,
            build_name,
        })
    }
}

/// A running log stream
#[async_trait]
pub trait LogTail: Send {
    /// Next complete line if one is already available. Never waits: `None`
    /// means nothing new yet, or the stream has ended.
    fn try_next_line(&mut self) -> Option<String>;

    /// Stop the stream and wait until it is gone
    async fn terminate(&mut self) -> Result<()>;

    /// Best-effort synchronous stop, for streams dropped without
    /// [`LogTail::terminate`]
    fn abort(&mut self);
}

/// Owns a [`LogTail`] for the length of one monitoring session.
///
/// [`TailSession::close`] terminates the stream exactly once; a session
/// dropped without closing aborts the stream instead.
pub struct TailSession {
    tail: Option<Box<dyn LogTail>>,
}

impl TailSession {
    pub fn new(tail: Box<dyn LogTail>) -> Self {
        Self { tail: Some(tail) }
    }

    pub fn try_next_line(&mut self) -> Option<String> {
        self.tail.as_mut()?.try_next_line()
    }

    pub fn is_open(&self) -> bool {
        self.tail.is_some()
    }

    /// Terminate the stream. Later calls are no-ops.
    pub async fn close(&mut self) {
        if let Some(mut tail) = self.tail.take() {
            if let Err(e) = tail.terminate().await {
                tracing::warn!("Failed to stop log stream: {}", e);
            }
        }
    }
}

impl Drop for TailSession {
    fn drop(&mut self) {
        if let Some(tail) = self.tail.as_mut() {
            tracing::debug!("Log stream dropped while open; aborting");
            tail.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        terminated: AtomicUsize,
        aborted: AtomicUsize,
    }

    struct CountingTail(Arc<Counters>);

    #[async_trait]
    impl LogTail for CountingTail {
        fn try_next_line(&mut self) -> Option<String> {
            Some("Step 1/3 : FROM base".to_string())
        }

        async fn terminate(&mut self) -> Result<()> {
            self.0.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn abort(&mut self) {
            self.0.aborted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_close_terminates_once() {
        let counters = Arc::new(Counters::default());
        let mut session = TailSession::new(Box::new(CountingTail(counters.clone())));

        assert!(session.try_next_line().is_some());
        session.close().await;
        session.close().await;
        assert!(!session.is_open());
        assert!(session.try_next_line().is_none());
        drop(session);

        assert_eq!(counters.terminated.load(Ordering::SeqCst), 1);
        assert_eq!(counters.aborted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_without_close_aborts() {
        let counters = Arc::new(Counters::default());
        let session = TailSession::new(Box::new(CountingTail(counters.clone())));
        drop(session);

        assert_eq!(counters.terminated.load(Ordering::SeqCst), 0);
        assert_eq!(counters.aborted.load(Ordering::SeqCst), 1);
    }
}
