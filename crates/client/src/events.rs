//! Server-sent event subscription
//!
//! An `EventStream` turns the service's `text/event-stream` endpoint into a
//! `Stream` of typed [`Event`]s. Dropped connections are re-established with
//! exponential backoff until too many consecutive attempts fail. A connection
//! that closes before delivering a single frame counts as a failed attempt.
//! Heartbeats never reach the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use hitl_common::{Event, EventStreamConfig, EventType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::CloudConnection;
use crate::error::{ApprovalError, Result};
use crate::sse::SseDecoder;

/// Bounds reconnection after the stream drops
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up; reset once a connection delivers a frame
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&EventStreamConfig::default())
    }
}

impl From<&EventStreamConfig> for ReconnectPolicy {
    fn from(config: &EventStreamConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2_u32.pow(exponent))
            .min(self.max_delay)
    }
}

/// Which events a subscription delivers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    /// Empty means every type except heartbeats
    pub event_types: Vec<EventType>,
    pub session_id: Option<String>,
    pub run_id: Option<String>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn types(event_types: impl IntoIterator<Item = EventType>) -> Self {
        Self {
            event_types: event_types.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Query parameters sent to the server, which may pre-filter
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if !self.event_types.is_empty() {
            let types = self
                .event_types
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(",");
            query.push(("event_types", types));
        }
        if let Some(session_id) = &self.session_id {
            query.push(("session_id", session_id.clone()));
        }
        if let Some(run_id) = &self.run_id {
            query.push(("run_id", run_id.clone()));
        }
        query
    }

    /// Client-side check; servers that ignore the query still get filtered
    pub fn matches(&self, event: &Event) -> bool {
        if event.event_type == EventType::Heartbeat {
            return false;
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(session_id) = &self.session_id {
            if event.data.session_id.as_deref() != Some(session_id.as_str()) {
                return false;
            }
        }
        if let Some(run_id) = &self.run_id {
            if event.data.run_id.as_deref() != Some(run_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Connection lifecycle callbacks for a subscription
pub trait SubscriptionHooks: Send + Sync {
    fn on_connect(&self) {}

    fn on_disconnect(&self, _reason: &str) {}
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl SubscriptionHooks for NoHooks {}

/// Subscription handle to the event endpoint.
///
/// Only one subscription per instance may be live at a time; create another
/// `EventStream` for a second concurrent subscription.
#[derive(Debug, Clone)]
pub struct EventStream {
    connection: CloudConnection,
    path: String,
    policy: ReconnectPolicy,
    active: Arc<AtomicBool>,
}

/// Releases the single-subscription slot when the stream is dropped
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl EventStream {
    pub fn new(connection: CloudConnection, config: &EventStreamConfig) -> Self {
        Self {
            connection,
            path: config.path.clone(),
            policy: ReconnectPolicy::from(config),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a subscription.
    ///
    /// The returned stream yields matching events until `cancel` fires, a
    /// fatal error occurs (yielded once, then the stream ends) or reconnects
    /// are exhausted (`ReconnectExhausted`).
    pub fn subscribe(
        &self,
        filter: EventFilter,
        hooks: Arc<dyn SubscriptionHooks>,
        cancel: CancellationToken,
    ) -> Result<impl Stream<Item = Result<Event>> + Send + 'static> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ApprovalError::validation(
                "subscription",
                "this event stream already has a live subscription",
            ));
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        let connection = self.connection.clone();
        let path = self.path.clone();
        let policy = self.policy.clone();
        let query = filter.to_query();

        Ok(async_stream::stream! {
            let _guard = guard;
            let mut failures: u32 = 0;

            'subscription: loop {
                let opened = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'subscription,
                    opened = connection.open_stream(&path, &query) => opened,
                };

                let last_error = match opened {
                    Ok(response) => {
                        info!("event stream connected");
                        hooks.on_connect();

                        let mut body = response.bytes_stream();
                        let mut decoder = SseDecoder::new();
                        let mut delivered = false;
                        let reason = loop {
                            let next = tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {
                                    hooks.on_disconnect("cancelled");
                                    break 'subscription;
                                }
                                next = body.next() => next,
                            };
                            match next {
                                Some(Ok(chunk)) => match decoder.push(&chunk) {
                                    Ok(frames) => {
                                        delivered |= !frames.is_empty();
                                        for frame in frames {
                                            match serde_json::from_str::<Event>(&frame.data) {
                                                Ok(event) if filter.matches(&event) => yield Ok(event),
                                                Ok(event) => debug!("filtered {} event", event.event_type),
                                                Err(e) => warn!("skipping undecodable event: {}", e),
                                            }
                                        }
                                    }
                                    Err(e) => break e.to_string(),
                                },
                                Some(Err(e)) => break e.to_string(),
                                None => break "closed by server".to_string(),
                            }
                        };
                        hooks.on_disconnect(&reason);
                        if delivered {
                            failures = 0;
                        }
                        reason
                    }
                    Err(e) if e.is_retryable() => e.to_string(),
                    Err(e) => {
                        yield Err(e);
                        break 'subscription;
                    }
                };

                failures += 1;
                if failures > policy.max_attempts {
                    yield Err(ApprovalError::ReconnectExhausted {
                        attempts: policy.max_attempts,
                        last_error,
                    });
                    break 'subscription;
                }

                let delay = policy.delay_for(failures);
                warn!(
                    "event stream disconnected ({}), reconnecting in {:?} (attempt {}/{})",
                    last_error, delay, failures, policy.max_attempts
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break 'subscription,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hitl_common::EventData;

    fn event(event_type: EventType, session: Option<&str>) -> Event {
        Event {
            event_type,
            timestamp: None,
            data: EventData {
                session_id: session.map(str::to_string),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_heartbeat_never_matches() {
        assert!(!EventFilter::all().matches(&event(EventType::Heartbeat, None)));
        assert!(!EventFilter::types([EventType::Heartbeat]).matches(&event(EventType::Heartbeat, None)));
        assert!(EventFilter::all().matches(&event(EventType::NewApproval, None)));
    }

    #[test]
    fn test_type_and_session_filtering() {
        let filter = EventFilter::types([EventType::ApprovalResolved]).with_session("s-1");
        assert!(filter.matches(&event(EventType::ApprovalResolved, Some("s-1"))));
        assert!(!filter.matches(&event(EventType::ApprovalResolved, Some("s-2"))));
        assert!(!filter.matches(&event(EventType::NewApproval, Some("s-1"))));
    }

    #[test]
    fn test_query_parameters() {
        let filter = EventFilter::types([EventType::NewApproval, EventType::ApprovalResolved])
            .with_run("run-1");
        assert_eq!(
            filter.to_query(),
            vec![
                ("event_types", "new_approval,approval_resolved".to_string()),
                ("run_id", "run-1".to_string()),
            ]
        );
        assert!(EventFilter::all().to_query().is_empty());
    }

    #[test]
    fn test_reconnect_delay_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(1500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1500));
    }
}
