use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::{
    error::Error,
    wg::{WireguardApi, config, state, validate_name},
};

/// Where a task is in its life. `Failed` and `Completed` are both final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Created,
    Decoding,
    Executing,
    Encoding,
    Completed,
    Failed,
}

type Job<T> = Box<dyn FnOnce() -> Result<T, Error> + Send + 'static>;

/// One configure, query or list operation.
///
/// Input is decoded when the task is built; a decode failure is kept and
/// handed back by [`Task::run`] instead of being returned from the
/// constructor. The device call itself happens on the blocking pool, and
/// the result comes back to whichever context awaits `run`. Consuming
/// `self` there means a task yields exactly one result.
pub struct Task<T> {
    meta: Meta,
    job: Result<Job<T>, Error>,
}

#[derive(Debug)]
struct Meta {
    kind: &'static str,
    target: String,
    stage: Stage,
}

impl Meta {
    fn advance(&mut self, next: Stage) {
        log::trace!("{} {}: {:?} -> {:?}", self.kind, self.target, self.stage, next);
        self.stage = next;
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Task").field(&self.meta).finish()
    }
}

impl<T: Send + 'static> Task<T> {
    fn prepare(
        kind: &'static str,
        target: &str,
        decode: impl FnOnce() -> Result<Job<T>, Error>,
    ) -> Self {
        let mut meta = Meta {
            kind,
            target: target.to_string(),
            stage: Stage::Created,
        };

        meta.advance(Stage::Decoding);
        let job = decode();
        if let Err(err) = &job {
            log::warn!("{kind} {target} rejected: {err}");
            meta.advance(Stage::Failed);
        }

        Self { meta, job }
    }

    pub fn stage(&self) -> Stage {
        self.meta.stage
    }

    /// Runs the device call off the current context and hands back its
    /// result, or the decode failure recorded at construction.
    pub async fn run(self) -> Result<T, Error> {
        let Task { mut meta, job } = self;
        let job = job?;

        meta.advance(Stage::Executing);
        log::debug!("{} {}: dispatched", meta.kind, meta.target);

        let result = match tokio::task::spawn_blocking(job).await {
            Ok(result) => result,
            Err(err) => Err(Error::Worker(err)),
        };

        match &result {
            Ok(_) => meta.advance(Stage::Completed),
            Err(err) => {
                log::warn!("{} {} failed: {err}", meta.kind, meta.target);
                meta.advance(Stage::Failed);
            }
        }

        result
    }

    /// Runs the task and calls `completion` with the result on the
    /// current `LocalSet`. Panics outside of a `LocalSet`.
    pub fn then<F>(self, completion: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<T, Error>) + 'static,
    {
        tokio::task::spawn_local(async move { completion(self.run().await) })
    }
}

impl Task<()> {
    pub fn configure<B: WireguardApi>(api: Arc<B>, name: &str, description: &Value) -> Self {
        Self::prepare("configure", name, || {
            let device = config::decode(name, description)?;

            Ok(Box::new(move || {
                api.set_device(&device.name, &device)
                    .map_err(Error::ExternalOperation)
            }))
        })
    }
}

impl Task<Value> {
    pub fn query<B: WireguardApi>(api: Arc<B>, name: &str) -> Self {
        Self::prepare("query", name, || {
            validate_name(name)?;
            let name = name.to_string();

            Ok(Box::new(move || {
                let device = api.get_device(&name).map_err(Error::ExternalOperation)?;
                log::trace!("query {name}: {:?} -> {:?}", Stage::Executing, Stage::Encoding);
                Ok(state::encode(&device))
            }))
        })
    }
}

impl Task<Vec<String>> {
    pub fn list<B: WireguardApi>(api: Arc<B>) -> Self {
        Self::prepare("list", "*", || {
            Ok(Box::new(move || api.list_devices().map_err(Error::Enumeration)))
        })
    }
}
