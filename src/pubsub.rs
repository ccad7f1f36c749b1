//! Topic-based publish/subscribe endpoints.

use crate::controller::ReceiveQueue;
use crate::error::{Error, Result};
use crate::transport::{PublisherLink, SubscriberLink};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MEDIA_TYPE: &str = "application/vnd.vector.silkit.data; protocolVersion=1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LabelKind {
    Optional,
    #[default]
    Mandatory,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub kind: LabelKind,
}

impl Label {
    pub fn mandatory(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind: LabelKind::Mandatory,
        }
    }

    pub fn optional(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind: LabelKind::Optional,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSpec {
    pub topic: String,
    pub media_type: String,
    #[serde(default)]
    pub labels: Vec<Label>,
}

impl DataSpec {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            media_type: DEFAULT_MEDIA_TYPE.to_string(),
            labels: Vec::new(),
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }

    fn label(&self, key: &str) -> Option<&Label> {
        self.labels.iter().find(|l| l.key == key)
    }

    /// Whether a subscriber with this spec receives data from `publisher`.
    pub fn matches_publisher(&self, publisher: &DataSpec) -> bool {
        if self.topic != publisher.topic {
            return false;
        }
        if !self.media_type.is_empty() && self.media_type != publisher.media_type {
            return false;
        }
        self.labels.iter().all(|wanted| match (wanted.kind, publisher.label(&wanted.key)) {
            (_, Some(offered)) => offered.value == wanted.value,
            (LabelKind::Mandatory, None) => false,
            (LabelKind::Optional, None) => true,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    pub topic: String,
    pub publisher: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

/// Callback invoked on the transport's delivery thread.
pub type DataHandler = Arc<dyn Fn(&DataMessage) + Send + Sync>;

pub struct Publisher {
    name: String,
    spec: DataSpec,
    link: Box<dyn PublisherLink>,
}

impl Publisher {
    pub(crate) fn new(name: &str, spec: DataSpec, link: Box<dyn PublisherLink>) -> Self {
        Self {
            name: name.to_string(),
            spec,
            link,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &DataSpec {
        &self.spec
    }

    pub fn publish(&self, payload: &[u8]) -> Result<()> {
        self.link.publish(payload)
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.link.detach();
    }
}

impl core::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Publisher").field("name", &self.name).field("spec", &self.spec).finish()
    }
}

pub struct Subscriber {
    name: String,
    spec: DataSpec,
    inbox: Option<Arc<ReceiveQueue<DataMessage>>>,
    link: Box<dyn SubscriberLink>,
}

impl Subscriber {
    pub(crate) fn new(
        name: &str,
        spec: DataSpec,
        inbox: Option<Arc<ReceiveQueue<DataMessage>>>,
        link: Box<dyn SubscriberLink>,
    ) -> Self {
        Self {
            name: name.to_string(),
            spec,
            inbox,
            link,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &DataSpec {
        &self.spec
    }

    /// Pops the oldest queued message. Subscribers created with a handler never queue.
    pub fn recv(&self) -> Result<DataMessage> {
        self.inbox
            .as_ref()
            .and_then(|q| q.try_pop())
            .ok_or_else(|| Error::QueueEmpty(self.name.clone()))
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<DataMessage> {
        self.inbox
            .as_ref()
            .and_then(|q| q.pop_timeout(timeout))
            .ok_or_else(|| Error::QueueEmpty(self.name.clone()))
    }

    pub fn dropped(&self) -> u64 {
        self.inbox.as_ref().map_or(0, |q| q.dropped())
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.link.detach();
    }
}

impl core::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscriber").field("name", &self.name).field("spec", &self.spec).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_and_media_type_matching() {
        let publisher = DataSpec::new("Temp");
        assert!(DataSpec::new("Temp").matches_publisher(&publisher));
        assert!(!DataSpec::new("Speed").matches_publisher(&publisher));
        assert!(DataSpec::new("Temp").with_media_type("").matches_publisher(&publisher));
        assert!(!DataSpec::new("Temp").with_media_type("text/plain").matches_publisher(&publisher));
    }

    #[test]
    fn test_label_matching() {
        let publisher = DataSpec::new("T").with_label(Label::mandatory("INSTANCE", "A"));
        assert!(DataSpec::new("T").matches_publisher(&publisher));
        assert!(DataSpec::new("T").with_label(Label::mandatory("INSTANCE", "A")).matches_publisher(&publisher));
        assert!(!DataSpec::new("T").with_label(Label::mandatory("INSTANCE", "B")).matches_publisher(&publisher));
        assert!(!DataSpec::new("T").with_label(Label::mandatory("ZONE", "1")).matches_publisher(&publisher));
        assert!(DataSpec::new("T").with_label(Label::optional("ZONE", "1")).matches_publisher(&publisher));
        assert!(!DataSpec::new("T").with_label(Label::optional("INSTANCE", "B")).matches_publisher(&publisher));
    }
}
