//! The measurement view model.

use std::sync::Arc;

use measure_engine::{
    Emission, MeasurementRecord, RawReading, RecordError, RecordId, RecordResult, Repository,
    SessionId, StorageError, StorageResult, Subscription,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What a measurement screen renders.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    /// Last good records, newest first.
    pub records: Arc<[MeasurementRecord]>,
    /// Most recent failure. Kept until [`MeasurementViewModel::clear_error`].
    pub error: Option<StorageError>,
    pub revision: u64,
    pub filter: Option<SessionId>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            records: Arc::from(Vec::new()),
            error: None,
            revision: 0,
            filter: None,
        }
    }
}

pub struct MeasurementViewModel {
    repository: Repository,
    state: Arc<watch::Sender<ViewState>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MeasurementViewModel {
    /// Observes every record.
    pub async fn new(repository: Repository) -> Self {
        Self::with_filter(repository, None).await
    }

    /// Observes one session, or everything for `None`. The state holds the
    /// current records when this returns.
    pub async fn with_filter(repository: Repository, filter: Option<SessionId>) -> Self {
        let (state, _) = watch::channel(ViewState::default());
        let view_model = Self {
            repository,
            state: Arc::new(state),
            pump: Mutex::new(None),
        };
        view_model.set_session_filter(filter).await;
        view_model
    }

    /// A receiver that sees every state change.
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> ViewState {
        self.state.borrow().clone()
    }

    pub async fn add_measurement(&self, reading: RawReading) -> RecordResult<RecordId> {
        let result = self.repository.record(reading).await;
        if let Err(RecordError::Storage(e)) = &result {
            self.set_error(e.clone());
        }
        result
    }

    pub async fn delete_measurement(&self, id: RecordId) -> StorageResult<()> {
        let result = self.repository.remove(id).await;
        self.note_failure(&result);
        result
    }

    pub async fn annotate_measurement(
        &self,
        id: RecordId,
        note: Option<String>,
    ) -> StorageResult<()> {
        let result = self.repository.annotate(id, note).await;
        self.note_failure(&result);
        result
    }

    /// Switches the observed scope. The old subscription is released before
    /// the new one is taken.
    pub async fn set_session_filter(&self, filter: Option<SessionId>) {
        let mut pump = self.pump.lock().await;
        if let Some(handle) = pump.take() {
            handle.abort();
            let _ = handle.await;
        }

        let mut subscription = self.repository.observe(filter.clone()).await;
        let initial = subscription.recv().await;
        self.state.send_modify(|state| state.filter = filter.clone());
        if let Some(emission) = initial {
            apply(&self.state, emission);
        }

        debug!(
            subscription = subscription.id(),
            filtered = filter.is_some(),
            "View model subscribed"
        );
        *pump = Some(tokio::spawn(run_pump(subscription, self.state.clone())));
    }

    pub fn clear_error(&self) {
        self.state.send_modify(|state| state.error = None);
    }

    /// Releases the subscription. The state keeps its last value.
    pub async fn close(&self) {
        if let Some(handle) = self.pump.lock().await.take() {
            handle.abort();
            let _ = handle.await;
            debug!("View model closed");
        }
    }

    fn note_failure<T>(&self, result: &StorageResult<T>) {
        if let Err(e) = result {
            self.set_error(e.clone());
        }
    }

    fn set_error(&self, error: StorageError) {
        warn!(error = %error, "Measurement action failed");
        self.state.send_modify(|state| state.error = Some(error));
    }
}

impl Drop for MeasurementViewModel {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_pump(mut subscription: Subscription, state: Arc<watch::Sender<ViewState>>) {
    while let Some(emission) = subscription.recv().await {
        apply(&state, emission);
    }
    debug!(subscription = subscription.id(), "Subscription ended");
}

fn apply(state: &watch::Sender<ViewState>, emission: Emission) {
    match emission {
        Ok(snapshot) => state.send_modify(|s| {
            s.records = snapshot.records().clone();
            s.revision = snapshot.revision();
        }),
        Err(e) => {
            warn!(error = %e, "Keeping last good records after storage error");
            state.send_modify(|s| s.error = Some(e));
        }
    }
}
