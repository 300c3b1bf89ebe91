// Spindle: Protected Path Forwarding with Hierarchical SDN Controllers
// Copyright (C) 2022  Spindle Developers
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Topic-routed pub/sub between controllers.
//!
//! The wire transport itself is an external collaborator; this module
//! defines the capability the runtime needs from it, the retry policy on
//! publish failure (tear the channel down, reopen, retry once), and an
//! in-process broker implementation for tests and single-host demos.

use log::*;
use spindle::ComError;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A topic with its payload bytes
pub type TopicMessage = (String, Vec<u8>);

/// The pub/sub capability the runtime consumes. Topics are dot-separated;
/// subscription patterns may end a segment with `*` to match any suffix
/// (`root.c.inter_domain.*`).
pub trait PubSub: Send {
    /// Publish a payload on a topic.
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), ComError>;

    /// Subscribe to a set of topic patterns; matching messages arrive on
    /// the returned channel.
    fn subscribe(&mut self, patterns: &[&str]) -> mpsc::UnboundedReceiver<TopicMessage>;

    /// Tear down and re-establish the send side after a failure.
    fn reopen(&mut self);
}

/// Publish with the standard retry policy: on failure reopen the channel
/// and try once more before giving up.
pub fn publish_with_retry(
    transport: &mut dyn PubSub,
    topic: &str,
    payload: Vec<u8>,
) -> Result<(), ComError> {
    match transport.publish(topic, payload.clone()) {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Exception while sending, restarting and trying again: {}", e);
            transport.reopen();
            transport.publish(topic, payload)
        }
    }
}

/// True if `topic` matches `pattern` (`*` matches one or more trailing
/// segments).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return topic.starts_with(prefix)
            && topic.len() > prefix.len()
            && topic.as_bytes()[prefix.len()] == b'.';
    }
    pattern == topic
}

struct Subscription {
    patterns: Vec<String>,
    sender: mpsc::UnboundedSender<TopicMessage>,
}

#[derive(Default)]
struct BrokerInner {
    subscriptions: Vec<Subscription>,
}

/// An in-process topic broker. Cloning yields another handle onto the same
/// broker, so every controller of a test or demo shares one message space.
#[derive(Clone, Default)]
pub struct InProcBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

impl InProcBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PubSub for InProcBroker {
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), ComError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ComError::SendFailed(topic.to_string()))?;
        inner.subscriptions.retain(|sub| !sub.sender.is_closed());
        for sub in &inner.subscriptions {
            if sub.patterns.iter().any(|p| topic_matches(p, topic)) {
                let _ = sub.sender.send((topic.to_string(), payload.clone()));
            }
        }
        Ok(())
    }

    fn subscribe(&mut self, patterns: &[&str]) -> mpsc::UnboundedReceiver<TopicMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut inner) = self.inner.lock() {
            inner.subscriptions.push(Subscription {
                patterns: patterns.iter().map(|p| p.to_string()).collect(),
                sender: tx,
            });
        }
        rx
    }

    fn reopen(&mut self) {
        // nothing to re-establish in process
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("root.c.topo", "root.c.topo"));
        assert!(topic_matches("root.c.inter_domain.*", "root.c.inter_domain.unknown_sw"));
        assert!(!topic_matches("root.c.inter_domain.*", "root.c.inter_domain"));
        assert!(!topic_matches("root.c.topo", "root.c.discover"));
        assert!(!topic_matches("c.1", "c.12"));
    }

    #[tokio::test]
    async fn test_broker_routes_by_pattern() {
        let mut broker = InProcBroker::new();
        let mut all = broker.clone().subscribe(&["root.c.*"]);
        let mut one = broker.clone().subscribe(&["c.7"]);

        broker.publish("root.c.topo", b"topo".to_vec()).unwrap();
        broker.publish("c.7", b"seven".to_vec()).unwrap();
        broker.publish("c.8", b"eight".to_vec()).unwrap();

        assert_eq!(all.recv().await.unwrap().0, "root.c.topo");
        assert_eq!(one.recv().await.unwrap().1, b"seven".to_vec());
        assert!(one.try_recv().is_err());
    }
}
