//! Archive hub: one task per open archive set.
//!
//! Each archive set is owned by a task receiving [HandleMessage]s, so updates of a
//! set are serialized while different sets are updated concurrently.
//!
//! Backends do synchronous IO, so these tasks run on the blocking thread pool
//! and hold one of its threads while the archive set is open.
use std::sync::Arc;

use anyhow::anyhow;
use compact_str::CompactString;
use dashmap::{mapref::entry::Entry, DashMap};
use indexmap::IndexMap;
use rrdkit_common::{
    backend::Backend,
    buffer::ValueBuffer,
    rrd::{
        definition::ConsolidationFunction, FetchResult, InfoValue, Rrd, RrdDefinition, RrdDump,
    },
    sample::Sample,
    RrdError, Timestamp,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::{self, JoinHandle},
};

type Reply<T> = oneshot::Sender<Result<T, RrdError>>;

#[derive(Debug)]
pub enum HandleMessage {
    Update {
        template: Option<Vec<CompactString>>,
        samples: Vec<Sample>,
        reply: Reply<()>,
    },
    Buffer {
        time: CompactString,
        values: Vec<CompactString>,
    },
    Flush {
        template: Option<Vec<CompactString>>,
        reply: Reply<usize>,
    },
    Fetch {
        cf: ConsolidationFunction,
        start: Timestamp,
        end: Timestamp,
        resolution: Option<u64>,
        reply: Reply<FetchResult>,
    },
    Info(oneshot::Sender<IndexMap<String, InfoValue>>),
    Dump(oneshot::Sender<RrdDump>),
    Delete(Reply<()>),
    Stop,
}

/// Handle to a running archive set.
#[derive(Debug, Clone)]
pub struct ArchiveHandle {
    name: Arc<str>,
    sender: mpsc::UnboundedSender<HandleMessage>,
}

impl ArchiveHandle {
    fn spawn(rrd: Rrd) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let name: Arc<str> = rrd.name().into();

        let task = task::spawn_blocking(move || run(rrd, receiver));

        (Self { name, sender }, task)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: HandleMessage) -> anyhow::Result<()> {
        self.sender
            .send(message)
            .map_err(|_| anyhow!("archive set '{}' is stopped", self.name))
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> HandleMessage,
    ) -> anyhow::Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(message(reply))?;

        response
            .await
            .map_err(|_| anyhow!("archive set '{}' stopped before replying", self.name))
    }

    pub async fn update(&self, samples: Vec<Sample>) -> anyhow::Result<()> {
        Ok(self
            .request(|reply| HandleMessage::Update {
                template: None,
                samples,
                reply,
            })
            .await??)
    }

    pub async fn update_with_template(
        &self,
        template: Vec<CompactString>,
        samples: Vec<Sample>,
    ) -> anyhow::Result<()> {
        Ok(self
            .request(|reply| HandleMessage::Update {
                template: Some(template),
                samples,
                reply,
            })
            .await??)
    }

    /// Queue readings, applied on [Self::flush] (or when the archive set stops).
    pub fn buffer_value<V>(
        &self,
        time: &str,
        values: impl IntoIterator<Item = V>,
    ) -> anyhow::Result<()>
    where
        V: Into<CompactString>,
    {
        self.send(HandleMessage::Buffer {
            time: time.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub async fn flush(&self, template: Option<Vec<CompactString>>) -> anyhow::Result<usize> {
        Ok(self
            .request(|reply| HandleMessage::Flush { template, reply })
            .await??)
    }

    pub async fn fetch(
        &self,
        cf: ConsolidationFunction,
        start: Timestamp,
        end: Timestamp,
        resolution: Option<u64>,
    ) -> anyhow::Result<FetchResult> {
        Ok(self
            .request(|reply| HandleMessage::Fetch {
                cf,
                start,
                end,
                resolution,
                reply,
            })
            .await??)
    }

    pub async fn info(&self) -> anyhow::Result<IndexMap<String, InfoValue>> {
        self.request(HandleMessage::Info).await
    }

    pub async fn dump(&self) -> anyhow::Result<RrdDump> {
        self.request(HandleMessage::Dump).await
    }
}

fn run(mut rrd: Rrd, mut receiver: mpsc::UnboundedReceiver<HandleMessage>) {
    let mut buffer = ValueBuffer::new();
    tracing::debug!("Started {}", rrd.name());

    while let Some(message) = receiver.blocking_recv() {
        match message {
            HandleMessage::Update {
                template,
                samples,
                reply,
            } => {
                let result = match &template {
                    Some(template) => rrd.update_with_template(template, &samples),
                    None => rrd.update(&samples),
                };

                if let Err(e) = &result {
                    tracing::warn!("{}: update failed: {e}", rrd.name());
                }

                reply.send(result).ok();
            }
            HandleMessage::Buffer { time, values } => buffer.buffer_value(time, values),
            HandleMessage::Flush { template, reply } => {
                let result = match &template {
                    Some(template) => buffer.flush_with_template(&mut rrd, template),
                    None => buffer.flush(&mut rrd),
                };

                reply.send(result).ok();
            }
            HandleMessage::Fetch {
                cf,
                start,
                end,
                resolution,
                reply,
            } => {
                reply
                    .send(rrd.fetch(cf, start, end, resolution).map(|f| f.to_result()))
                    .ok();
            }
            HandleMessage::Info(reply) => {
                reply.send(rrd.info()).ok();
            }
            HandleMessage::Dump(reply) => {
                reply.send(rrd.dump()).ok();
            }
            HandleMessage::Delete(reply) => {
                if !buffer.is_empty() {
                    tracing::warn!(
                        "{}: dropping {} buffered readings",
                        rrd.name(),
                        buffer.len()
                    );
                }

                reply.send(rrd.delete()).ok();
                return;
            }
            HandleMessage::Stop => break,
        }
    }

    if !buffer.is_empty() {
        if let Err(e) = buffer.flush(&mut rrd) {
            tracing::error!("{}: unable to apply buffered readings: {e}", rrd.name());
        }
    }

    tracing::debug!("Stopped {}", rrd.name());
}

/// Registry of running archive sets.
#[derive(Debug)]
pub struct ArchiveHub {
    backend: Arc<dyn Backend>,
    sets: DashMap<Box<str>, (ArchiveHandle, JoinHandle<()>)>,
}

impl ArchiveHub {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            sets: DashMap::new(),
        }
    }

    /// Names of all stored archive sets, running or not.
    pub fn stored(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.backend.list()?)
    }

    pub fn create(&self, name: &str, definition: RrdDefinition) -> anyhow::Result<ArchiveHandle> {
        let rrd = Rrd::create(name, definition, self.backend.clone())?;
        Ok(self.insert(rrd))
    }

    pub fn restore(&self, name: &str, dump: RrdDump) -> anyhow::Result<ArchiveHandle> {
        let rrd = Rrd::restore(name, dump, self.backend.clone())?;
        Ok(self.insert(rrd))
    }

    fn insert(&self, rrd: Rrd) -> ArchiveHandle {
        let (handle, task) = ArchiveHandle::spawn(rrd);

        if let Some((old, _)) = self
            .sets
            .insert(handle.name.as_ref().into(), (handle.clone(), task))
        {
            tracing::warn!("Replaced running archive set {}", old.name);
            old.send(HandleMessage::Stop).ok();
        }

        handle
    }

    /// Running archive set `name`, started from the backend if needed.
    pub fn open(&self, name: &str) -> anyhow::Result<ArchiveHandle> {
        match self.sets.entry(name.into()) {
            Entry::Occupied(entry) => Ok(entry.get().0.clone()),
            Entry::Vacant(entry) => {
                let rrd = Rrd::open(name, self.backend.clone())?;
                let (handle, task) = ArchiveHandle::spawn(rrd);

                entry.insert((handle.clone(), task));
                Ok(handle)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<ArchiveHandle> {
        self.sets.get(name).map(|entry| entry.0.clone())
    }

    pub async fn delete(&self, name: &str) -> anyhow::Result<()> {
        match self.sets.remove(name) {
            Some((_, (handle, task))) => {
                handle.request(HandleMessage::Delete).await??;
                task.await?;
            }
            None => self.backend.delete(name)?,
        }

        Ok(())
    }

    /// Stop every archive set, applying pending buffered readings.
    pub async fn shutdown(&self) {
        let names: Vec<Box<str>> = self.sets.iter().map(|entry| entry.key().clone()).collect();

        let tasks = names
            .iter()
            .filter_map(|name| self.sets.remove(name))
            .map(|(_, (handle, task))| {
                handle.send(HandleMessage::Stop).ok();
                task
            });

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::error!("Archive set task failed: {e}");
            }
        }
    }
}
