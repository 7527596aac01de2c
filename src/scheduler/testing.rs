//! Test doubles for the scheduler.

use super::job::ReplyHandle;
use crate::error::{Result, TranspoolError};
use crate::probe::ResourceProbe;
use crate::translate::Translator;
use crate::worker::{Recv, WorkRequest, WorkResponse, WorkerChannel, WorkerSpawner};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Probe with fixed readings. `None` fields make the call fail.
pub struct FakeProbe {
    memory: Option<f64>,
    per_core: Option<Vec<f64>>,
    cores: usize,
}

impl FakeProbe {
    /// Low memory, every core at 0 %.
    pub fn idle(cores: usize) -> Self {
        Self {
            memory: Some(10.0),
            per_core: Some(vec![0.0; cores]),
            cores,
        }
    }

    pub fn with_memory(mut self, percent: f64) -> Self {
        self.memory = Some(percent);
        self
    }

    pub fn with_memory_error(mut self) -> Self {
        self.memory = None;
        self
    }

    pub fn with_per_core(mut self, usage: Vec<f64>) -> Self {
        self.per_core = Some(usage);
        self
    }

    pub fn with_cpu_error(mut self) -> Self {
        self.per_core = None;
        self
    }
}

impl ResourceProbe for FakeProbe {
    fn memory_percent(&self) -> Result<f64> {
        self.memory
            .ok_or_else(|| TranspoolError::Probe("memory unavailable".into()))
    }

    fn per_core_cpu(&self) -> Result<Vec<f64>> {
        self.per_core
            .clone()
            .ok_or_else(|| TranspoolError::Probe("cpu unavailable".into()))
    }

    fn overall_cpu(&self) -> Result<f64> {
        let usage = self.per_core_cpu()?;
        Ok(usage.iter().sum::<f64>() / usage.len().max(1) as f64)
    }

    fn total_cores(&self) -> usize {
        self.cores
    }
}

/// Collects every reply sent to it. Clones share the log.
#[derive(Clone, Default)]
pub struct RecordingReply {
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingReply {
    pub fn replies(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl ReplyHandle for RecordingReply {
    fn reply(&self, text: &str) -> Result<()> {
        self.log.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Echoes its input and remembers every call.
#[derive(Default)]
pub struct RecordingTranslator {
    calls: Mutex<Vec<String>>,
}

impl RecordingTranslator {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Translator for RecordingTranslator {
    fn translate(&self, text: &str) -> Result<String> {
        self.calls.lock().unwrap().push(text.to_string());
        Ok(text.to_string())
    }
}

/// Scripted worker state shared between a [`FakeChannel`] and the test.
#[derive(Default)]
struct FakeWorker {
    sent: Vec<WorkRequest>,
    /// `None` entries are delivered as garbled messages.
    inbox: VecDeque<Option<WorkResponse>>,
    broken: bool,
    hung_up: bool,
    closed: bool,
}

struct FakeChannel {
    pid: u32,
    state: Arc<Mutex<FakeWorker>>,
}

impl WorkerChannel for FakeChannel {
    fn worker_pid(&self) -> u32 {
        self.pid
    }

    fn send(&mut self, request: &WorkRequest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.broken {
            return Err(TranspoolError::ChannelClosed { pid: self.pid });
        }
        state.sent.push(request.clone());
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Recv<WorkResponse>> {
        let mut state = self.state.lock().unwrap();
        match state.inbox.pop_front() {
            Some(Some(response)) => Ok(Recv::Message(response)),
            Some(None) => Err(serde_json::from_str::<WorkResponse>("garbled")
                .unwrap_err()
                .into()),
            None if state.hung_up => Ok(Recv::Closed),
            None => Ok(Recv::Empty),
        }
    }

    fn close(self: Box<Self>) {
        self.state.lock().unwrap().closed = true;
    }
}

/// Handles to every worker a [`FakeSpawner`] started, in spawn order.
#[derive(Clone, Default)]
pub struct FakeWorkers {
    inner: Arc<Mutex<Vec<Arc<Mutex<FakeWorker>>>>>,
}

impl FakeWorkers {
    fn get(&self, index: usize) -> Arc<Mutex<FakeWorker>> {
        Arc::clone(&self.inner.lock().unwrap()[index])
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn closed(&self, index: usize) -> bool {
        self.get(index).lock().unwrap().closed
    }

    pub fn sent(&self, index: usize) -> Vec<WorkRequest> {
        self.get(index).lock().unwrap().sent.clone()
    }

    /// Queue a response for the coordinator to pick up.
    pub fn respond(&self, index: usize, response: WorkResponse) {
        self.get(index).lock().unwrap().inbox.push_back(Some(response));
    }

    /// Answer every translate request sent so far with its own text.
    pub fn echo_all(&self, index: usize) {
        let worker = self.get(index);
        let mut worker = worker.lock().unwrap();
        let answers: Vec<_> = worker
            .sent
            .drain(..)
            .filter_map(|req| match req {
                WorkRequest::Translate { id, text } => Some(WorkResponse::result(id, Some(text))),
                WorkRequest::Stop => None,
            })
            .collect();
        worker.inbox.extend(answers.into_iter().map(Some));
    }

    pub fn garble(&self, index: usize) {
        self.get(index).lock().unwrap().inbox.push_back(None);
    }

    /// Make the worker's channel report EOF once its inbox is empty.
    pub fn hang_up(&self, index: usize) {
        self.get(index).lock().unwrap().hung_up = true;
    }
}

/// Spawner producing scripted channels.
#[derive(Default)]
pub struct FakeSpawner {
    workers: FakeWorkers,
    broken: bool,
    failing: bool,
}

impl FakeSpawner {
    /// Every channel rejects sends.
    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    /// Spawning itself fails.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn workers(&self) -> FakeWorkers {
        self.workers.clone()
    }
}

impl WorkerSpawner for FakeSpawner {
    fn spawn(&self, core_id: usize) -> Result<Box<dyn WorkerChannel>> {
        if self.failing {
            return Err(TranspoolError::Worker(format!("cannot start worker on core {}", core_id)));
        }
        let state = Arc::new(Mutex::new(FakeWorker {
            broken: self.broken,
            ..Default::default()
        }));
        let mut all = self.workers.inner.lock().unwrap();
        all.push(Arc::clone(&state));
        Ok(Box::new(FakeChannel {
            pid: 1000 + all.len() as u32,
            state,
        }))
    }
}
