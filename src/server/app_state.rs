use std::{sync::Arc, time::Instant};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::join_all;
use tracing::info;

use crate::{
    audio::background::BackgroundTrack,
    common::{errors::MixerResult, types::CallId},
    configs::Config,
    engine::MixerEngine,
};

/// Top-level application state.
pub struct AppState {
    pub config: Config,
    /// Decoded once at startup; every call gets its own cursor over it.
    pub background: Arc<[i16]>,
    pub calls: DashMap<CallId, Arc<MixerEngine>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, background: Arc<[i16]>) -> Self {
        Self {
            config,
            background,
            calls: DashMap::new(),
            started_at: Instant::now(),
        }
    }

    pub fn new_track(&self) -> MixerResult<BackgroundTrack> {
        BackgroundTrack::new(self.background.clone())
    }

    /// Build and register an engine under `call_id` in one step.
    ///
    /// Returns `Ok(None)` when the id is already taken; `build` is not run in
    /// that case, so a live call's resources are never touched.
    pub fn register_call(
        &self,
        call_id: CallId,
        build: impl FnOnce(CallId) -> MixerResult<MixerEngine>,
    ) -> MixerResult<Option<Arc<MixerEngine>>> {
        match self.calls.entry(call_id) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(slot) => {
                let engine = Arc::new(build(slot.key().clone())?);
                slot.insert(engine.clone());
                Ok(Some(engine))
            }
        }
    }

    /// Remove `engine` from the registry, but only if its id still maps to it.
    pub fn deregister_call(&self, engine: &Arc<MixerEngine>) -> bool {
        self.calls
            .remove_if(engine.call_id(), |_, registered| Arc::ptr_eq(registered, engine))
            .is_some()
    }

    /// Stop every active call concurrently.
    pub async fn shutdown(&self) {
        let engines: Vec<Arc<MixerEngine>> =
            self.calls.iter().map(|entry| entry.value().clone()).collect();
        self.calls.clear();
        if engines.is_empty() {
            return;
        }

        info!("Stopping {} active call(s)", engines.len());
        join_all(engines.iter().map(|engine| engine.stop())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm;

    #[tokio::test]
    async fn calls_get_independent_cursors() {
        let state = AppState::new(Config::default(), Arc::from(vec![1i16, 2, 3, 4]));
        let mut a = state.new_track().unwrap();
        let mut b = state.new_track().unwrap();

        assert_eq!(a.read(3), vec![1, 2, 3]);
        assert_eq!(b.read(2), vec![1, 2]);
        assert_eq!(a.read(2), vec![4, 1]);
        assert!(Arc::ptr_eq(a.samples(), b.samples()));
    }

    #[tokio::test]
    async fn shutdown_stops_and_forgets_calls() {
        let state = AppState::new(Config::default(), Arc::from(vec![7i16; 1_600]));
        let engine = Arc::new(
            MixerEngine::builder(state.config.mixer.clone(), state.new_track().unwrap())
                .build()
                .unwrap(),
        );
        engine.start().unwrap();
        state.calls.insert(engine.call_id().clone(), engine.clone());

        state.shutdown().await;

        assert!(state.calls.is_empty());
        assert!(!engine.is_running());
        assert!(engine.push(pcm::encode(&[1i16; 4]), true).is_err());
    }

    fn build_with(state: &AppState) -> impl FnOnce(CallId) -> MixerResult<MixerEngine> + '_ {
        move |id| {
            MixerEngine::builder(state.config.mixer.clone(), state.new_track()?)
                .call_id(id)
                .build()
        }
    }

    #[tokio::test]
    async fn duplicate_call_id_is_refused_without_building() {
        let state = AppState::new(Config::default(), Arc::from(vec![0i16; 160]));
        let id = CallId::from("leg-7".to_string());

        let first = state.register_call(id.clone(), build_with(&state)).unwrap().unwrap();
        let second = state
            .register_call(id.clone(), |_| panic!("must not build for a taken id"))
            .unwrap();

        assert!(second.is_none());
        assert!(Arc::ptr_eq(state.calls.get(&id).unwrap().value(), &first));
        state.shutdown().await;
    }

    #[tokio::test]
    async fn stale_engine_cannot_deregister_its_successor() {
        let state = AppState::new(Config::default(), Arc::from(vec![0i16; 160]));
        let id = CallId::from("leg-8".to_string());

        let old = state.register_call(id.clone(), build_with(&state)).unwrap().unwrap();
        assert!(state.deregister_call(&old));
        let new = state.register_call(id.clone(), build_with(&state)).unwrap().unwrap();

        assert!(!state.deregister_call(&old));
        assert!(Arc::ptr_eq(state.calls.get(&id).unwrap().value(), &new));
        assert!(state.deregister_call(&new));
        assert!(state.calls.is_empty());
    }

    #[test]
    fn failed_build_leaves_id_free() {
        let state = AppState::new(Config::default(), Arc::from(vec![0i16; 160]));
        let id = CallId::from("leg-9".to_string());
        let result = state.register_call(id.clone(), |_| Err(crate::common::errors::MixerError::EmptyTrack));
        assert!(result.is_err());
        assert!(!state.calls.contains_key(&id));
    }

    #[test]
    fn empty_background_cannot_back_a_call() {
        let state = AppState::new(Config::default(), Arc::from(Vec::<i16>::new()));
        assert!(state.new_track().is_err());
    }
}
