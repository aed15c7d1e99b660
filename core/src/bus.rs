//! Directory-backed message bus between the planner and the actuator.
//!
//! One subdirectory per topic, one JSON file per message, named `<id>.json`.
//! Producers write to a temp file and rename, so a message file exists only
//! once its whole content is on disk. Consumers take the oldest file first
//! and delete it after a successful read; the delete is the at-most-once
//! commit. Multiple consumers compete benignly because only one delete can
//! succeed per file.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::debug;

use autopilot_protocol::protocol::Message;
use autopilot_protocol::protocol::Topic;

use crate::error::AutopilotErr;
use crate::error::Result;

/// How often a blocked receive re-scans its topic directory.
const POLL_TICK: Duration = Duration::from_millis(100);

pub struct MessageBus {
    base_dir: PathBuf,
}

impl MessageBus {
    /// Creates the topic directories under `base_dir` if needed.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        for topic in Topic::ALL {
            std::fs::create_dir_all(base_dir.join(topic.dir_name()))?;
        }
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn topic_dir(&self, topic: Topic) -> PathBuf {
        self.base_dir.join(topic.dir_name())
    }

    /// Publishes `payload` under a fresh message id and returns that id.
    pub async fn send<T: Serialize>(&self, topic: Topic, payload: &T) -> Result<String> {
        let message = Message::new(topic, serde_json::to_value(payload)?);
        let id = message.id.clone();
        self.write_message(&message).await?;
        Ok(id)
    }

    /// Publishes a correlated response: the file is stored under `id`, the
    /// id the requester is polling for.
    pub async fn send_with_id<T: Serialize>(
        &self,
        topic: Topic,
        id: &str,
        payload: &T,
    ) -> Result<()> {
        let message = Message::with_id(topic, id.to_string(), serde_json::to_value(payload)?);
        self.write_message(&message).await
    }

    async fn write_message(&self, message: &Message) -> Result<()> {
        let dir = self.topic_dir(message.topic);
        let tmp_path = dir.join(format!(".{}.json.tmp", message.id));
        let final_path = dir.join(format!("{}.json", message.id));

        let bytes = serde_json::to_vec_pretty(message)?;
        tokio::fs::write(&tmp_path, &bytes).await.map_err(|e| {
            AutopilotErr::Communication(format!("failed to write {}: {e}", tmp_path.display()))
        })?;
        tokio::fs::rename(&tmp_path, &final_path).await.map_err(|e| {
            AutopilotErr::Communication(format!("failed to publish {}: {e}", final_path.display()))
        })?;

        debug!(topic = %message.topic, id = %message.id, "sent message");
        Ok(())
    }

    /// Takes the oldest message on `topic`, deleting it from the bus.
    ///
    /// With a zero `timeout` this returns immediately when the topic is
    /// empty; otherwise it polls until a message arrives or the timeout
    /// expires.
    pub async fn receive(&self, topic: Topic, timeout: Duration) -> Result<Option<Message>> {
        let deadline = Instant::now() + timeout;
        loop {
            while let Some(path) = self.oldest_message_file(topic).await? {
                if let Some(message) = self.consume(&path).await? {
                    return Ok(Some(message));
                }
                // Lost the race for this file to another consumer; rescan.
            }
            if timeout.is_zero() || Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(POLL_TICK).await;
        }
    }

    /// Takes the message stored under `id` on `topic`, used for correlated
    /// responses.
    pub async fn receive_by_id(
        &self,
        topic: Topic,
        id: &str,
        timeout: Duration,
    ) -> Result<Option<Message>> {
        let path = self.topic_dir(topic).join(format!("{id}.json"));
        let deadline = Instant::now() + timeout;
        loop {
            if path.exists() {
                if let Some(message) = self.consume(&path).await? {
                    return Ok(Some(message));
                }
            }
            if timeout.is_zero() || Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(POLL_TICK).await;
        }
    }

    /// Removes every pending message on every topic.
    pub async fn clear(&self) -> Result<()> {
        for topic in Topic::ALL {
            let dir = self.topic_dir(topic);
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.path().extension().is_some_and(|e| e == "json") {
                    tokio::fs::remove_file(entry.path()).await.ok();
                }
            }
        }
        Ok(())
    }

    async fn oldest_message_file(&self, topic: Topic) -> Result<Option<PathBuf>> {
        let dir = self.topic_dir(topic);
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
            AutopilotErr::Communication(format!("failed to list {}: {e}", dir.display()))
        })?;

        let mut oldest: Option<(std::time::SystemTime, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if oldest.as_ref().is_none_or(|(ts, _)| modified < *ts) {
                oldest = Some((modified, path));
            }
        }
        Ok(oldest.map(|(_, path)| path))
    }

    /// Reads, parses, and deletes one message file. Returns `None` when a
    /// competing consumer committed the file first. A malformed file is an
    /// error and is left in place for diagnosis.
    async fn consume(&self, path: &Path) -> Result<Option<Message>> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AutopilotErr::Communication(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let message: Message = serde_json::from_str(&contents).map_err(|e| {
            AutopilotErr::Communication(format!("malformed message file {}: {e}", path.display()))
        })?;

        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(topic = %message.topic, id = %message.id, "received message");
                Ok(Some(message))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AutopilotErr::Communication(format!(
                "failed to commit {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Decodes a message's payload into its typed form.
pub fn decode_payload<T: DeserializeOwned>(message: &Message) -> Result<T> {
    serde_json::from_value(message.payload.clone()).map_err(|e| {
        AutopilotErr::Communication(format!(
            "invalid {} payload in message {}: {e}",
            message.topic, message.id
        ))
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn bus() -> (tempfile::TempDir, MessageBus) {
        let dir = tempfile::tempdir().unwrap();
        let bus = MessageBus::new(dir.path()).unwrap();
        (dir, bus)
    }

    #[tokio::test]
    async fn send_then_receive_preserves_the_payload_and_deletes_the_file() {
        let (_dir, bus) = bus();
        let payload = json!({"answer": 42, "nested": {"ok": true}});

        let id = bus.send(Topic::Program, &payload).await.unwrap();
        let message = bus
            .receive(Topic::Program, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(message.id, id);
        assert_eq!(message.payload, payload);
        // Delete-on-read is the commit.
        assert_eq!(bus.receive(Topic::Program, Duration::ZERO).await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_topic_with_zero_timeout_returns_immediately() {
        let (_dir, bus) = bus();
        let started = Instant::now();
        let message = bus.receive(Topic::VisionRequest, Duration::ZERO).await.unwrap();
        assert_eq!(message, None);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn messages_are_received_oldest_first() {
        let (_dir, bus) = bus();
        bus.send(Topic::Program, &json!({"seq": 1})).await.unwrap();
        sleep(Duration::from_millis(30)).await;
        bus.send(Topic::Program, &json!({"seq": 2})).await.unwrap();

        let first = bus
            .receive(Topic::Program, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        let second = bus
            .receive(Topic::Program, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.payload["seq"], json!(1));
        assert_eq!(second.payload["seq"], json!(2));
    }

    #[tokio::test]
    async fn malformed_files_fail_receive_and_are_left_in_place() {
        let (dir, bus) = bus();
        let bad = dir.path().join("program").join("bad.json");
        tokio::fs::write(&bad, "{truncated").await.unwrap();

        let err = bus.receive(Topic::Program, Duration::ZERO).await.unwrap_err();
        assert_eq!(err.kind(), "communication_error");
        assert!(err.to_string().contains("bad.json"));
        assert!(bad.exists(), "malformed file must stay for diagnosis");
    }

    #[tokio::test]
    async fn receive_by_id_takes_only_the_correlated_message() {
        let (_dir, bus) = bus();
        bus.send_with_id(Topic::ProgramStatus, "other", &json!({"n": 1}))
            .await
            .unwrap();
        bus.send_with_id(Topic::ProgramStatus, "wanted", &json!({"n": 2}))
            .await
            .unwrap();

        let message = bus
            .receive_by_id(Topic::ProgramStatus, "wanted", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.payload["n"], json!(2));

        // The uncorrelated message is untouched.
        let rest = bus
            .receive(Topic::ProgramStatus, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rest.id, "other");
    }

    #[tokio::test]
    async fn blocked_receive_wakes_up_for_a_late_message() {
        let (_dir, bus) = bus();
        let bus = Arc::new(bus);

        let sender = bus.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            sender.send(Topic::Program, &json!({"late": true})).await.unwrap();
        });

        let message = bus
            .receive(Topic::Program, Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.payload["late"], json!(true));
    }

    #[tokio::test]
    async fn clear_empties_every_topic() {
        let (_dir, bus) = bus();
        bus.send(Topic::Program, &json!(1)).await.unwrap();
        bus.send(Topic::VisionResult, &json!(2)).await.unwrap();

        bus.clear().await.unwrap();

        assert_eq!(bus.receive(Topic::Program, Duration::ZERO).await.unwrap(), None);
        assert_eq!(
            bus.receive(Topic::VisionResult, Duration::ZERO).await.unwrap(),
            None
        );
    }
}
