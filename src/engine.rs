// src/engine.rs
//! Registry of live consumers: at most one per kind, each with its own
//! scheduler. All control events go through [`ConsumerRegistry::dispatch`].
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use log::{info, warn};
use crate::consumers::{Consumer, ConsumerView};
use crate::drivers::MonitorError;
use crate::scheduler::{SchedulerDiagnostics, UpdateScheduler, DEFAULT_OVERRUN_FACTOR};
use crate::types::{ConsumerCommand, ConsumerKind};

type SharedConsumer = Arc<Mutex<Box<dyn Consumer>>>;

fn lock(consumer: &SharedConsumer) -> MutexGuard<'_, Box<dyn Consumer>> {
    consumer.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct LiveConsumer {
    consumer: SharedConsumer,
    scheduler: UpdateScheduler,
}

pub struct ConsumerRegistry {
    slots: BTreeMap<ConsumerKind, Option<LiveConsumer>>,
    overrun_factor: u32,
}

impl Default for ConsumerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self {
            slots: ConsumerKind::ALL.iter().map(|&kind| (kind, None)).collect(),
            overrun_factor: DEFAULT_OVERRUN_FACTOR,
        }
    }

    /// Applies to schedulers created from now on.
    pub fn with_overrun_factor(mut self, factor: u32) -> Self {
        self.overrun_factor = factor;
        self
    }

    /// Computes the first view right away, then starts ticking.
    pub fn create(&mut self, consumer: Box<dyn Consumer>, interval_ms: u64) -> Result<(), MonitorError> {
        let kind = consumer.kind();
        let slot = self.slots.entry(kind).or_insert(None);
        if slot.is_some() {
            return Err(MonitorError::ConsumerActive(kind));
        }
        let consumer: SharedConsumer = Arc::new(Mutex::new(consumer));
        refresh_now(kind, &consumer)?;
        let ticking = Arc::clone(&consumer);
        let mut scheduler = UpdateScheduler::new(
            kind.to_string(),
            interval_ms,
            Box::new(move || lock(&ticking).refresh()),
        )
        .with_overrun_factor(self.overrun_factor);
        scheduler.start();
        *slot = Some(LiveConsumer { consumer, scheduler });
        info!("{kind} consumer created, interval {interval_ms} ms");
        Ok(())
    }

    /// Stops the scheduler, then drops the consumer.
    pub fn destroy(&mut self, kind: ConsumerKind) -> Result<(), MonitorError> {
        let mut live = self
            .slots
            .get_mut(&kind)
            .and_then(Option::take)
            .ok_or(MonitorError::ConsumerMissing(kind))?;
        live.scheduler.stop();
        info!("{kind} consumer destroyed");
        Ok(())
    }

    pub fn dispatch(&mut self, kind: ConsumerKind, command: ConsumerCommand) -> Result<(), MonitorError> {
        let live = self.live(kind)?;
        if let ConsumerCommand::SetInterval(interval_ms) = command {
            live.scheduler.set_interval(interval_ms);
        } else {
            lock(&live.consumer).apply(&command)?;
        }
        if command.forces_refresh() {
            refresh_now(kind, &live.consumer)?;
        }
        Ok(())
    }

    pub fn view(&self, kind: ConsumerKind) -> Result<Option<ConsumerView>, MonitorError> {
        Ok(lock(&self.live(kind)?.consumer).view())
    }

    pub fn diagnostics(&self, kind: ConsumerKind) -> Result<SchedulerDiagnostics, MonitorError> {
        Ok(self.live(kind)?.scheduler.diagnostics())
    }

    pub fn is_active(&self, kind: ConsumerKind) -> bool {
        matches!(self.slots.get(&kind), Some(Some(_)))
    }

    pub fn active_kinds(&self) -> Vec<ConsumerKind> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.is_some())
            .map(|(&kind, _)| kind)
            .collect()
    }

    pub fn shutdown(&mut self) {
        for kind in self.active_kinds() {
            if let Err(err) = self.destroy(kind) {
                warn!("{kind}: shutdown failed: {err}");
            }
        }
    }

    fn live(&self, kind: ConsumerKind) -> Result<&LiveConsumer, MonitorError> {
        self.slots
            .get(&kind)
            .and_then(Option::as_ref)
            .ok_or(MonitorError::ConsumerMissing(kind))
    }
}

impl Drop for ConsumerRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// Transient failures leave the previous view in place; anything else is the caller's problem.
fn refresh_now(kind: ConsumerKind, consumer: &SharedConsumer) -> Result<(), MonitorError> {
    match lock(consumer).refresh() {
        Err(err) if err.is_transient() => {
            warn!("{kind}: refresh skipped, showing stale data: {err}");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumers::{build_consumer, ConsumerSettings};
    use crate::drivers::{
        Kernel, MemoryStore, PlacementMatrix, PlotStyle, StandardFeatures, WindowSource,
    };
    use std::thread;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryStore>, Arc<WindowSource>) {
        let channels: Vec<String> = vec!["c1".into(), "c2".into()];
        let store = Arc::new(MemoryStore::default());
        store.create_table("emg", channels.clone());
        for idx in 1..=20 {
            store
                .append("emg", "s01", "1", idx, vec![idx as f64, 1.0])
                .unwrap();
        }
        let source = WindowSource::new(store.clone(), "emg", channels, "s01", "1", 8).unwrap();
        (store, Arc::new(source))
    }

    fn consumer(kind: ConsumerKind, source: &Arc<WindowSource>) -> Box<dyn Consumer> {
        let settings = ConsumerSettings {
            feature: "MAV".into(),
            sample_rate_hz: 100.0,
            scroll_depth: 16,
            channel: None,
            style: PlotStyle::default(),
            kernel: Kernel::default(),
        };
        let placement = PlacementMatrix::row_major(2, 2).unwrap();
        build_consumer(
            kind,
            Arc::clone(source),
            Arc::new(StandardFeatures),
            &settings,
            Some(placement),
        )
        .unwrap()
    }

    #[test]
    fn one_live_instance_per_kind() {
        let (_, source) = setup();
        let mut registry = ConsumerRegistry::new();
        registry.create(consumer(ConsumerKind::Heatmap, &source), 5).unwrap();
        let err = registry
            .create(consumer(ConsumerKind::Heatmap, &source), 5)
            .unwrap_err();
        assert!(matches!(err, MonitorError::ConsumerActive(ConsumerKind::Heatmap)));
        registry.create(consumer(ConsumerKind::Spectrum, &source), 5).unwrap();
        assert_eq!(
            registry.active_kinds(),
            vec![ConsumerKind::Heatmap, ConsumerKind::Spectrum]
        );
        registry.destroy(ConsumerKind::Heatmap).unwrap();
        assert!(!registry.is_active(ConsumerKind::Heatmap));
        assert!(matches!(
            registry.destroy(ConsumerKind::Heatmap),
            Err(MonitorError::ConsumerMissing(_))
        ));
        registry.create(consumer(ConsumerKind::Heatmap, &source), 5).unwrap();
        registry.shutdown();
        assert!(registry.active_kinds().is_empty());
    }

    #[test]
    fn create_publishes_a_view_immediately() {
        let (_, source) = setup();
        let mut registry = ConsumerRegistry::new();
        registry
            .create(consumer(ConsumerKind::LineplotRaw, &source), 1_000)
            .unwrap();
        let Some(ConsumerView::Raw { series, .. }) = registry.view(ConsumerKind::LineplotRaw).unwrap()
        else {
            panic!("expected a raw view");
        };
        assert_eq!(series.len(), 8);
        assert_eq!(series.last().unwrap().1, 20.0);
    }

    #[test]
    fn window_length_dispatch_recomputes_right_away() {
        let (_, source) = setup();
        let mut registry = ConsumerRegistry::new();
        registry
            .create(consumer(ConsumerKind::Spectrum, &source), 1_000)
            .unwrap();
        registry
            .dispatch(ConsumerKind::Spectrum, ConsumerCommand::SetWindowLength(16))
            .unwrap();
        assert_eq!(source.window_length(), 16);
        let Some(ConsumerView::Spectrum(spectrum)) = registry.view(ConsumerKind::Spectrum).unwrap()
        else {
            panic!("expected a spectrum view");
        };
        assert_eq!(spectrum.len(), 8);
    }

    #[test]
    fn dispatch_to_missing_kind_fails() {
        let mut registry = ConsumerRegistry::new();
        assert!(matches!(
            registry.dispatch(ConsumerKind::Lineplot, ConsumerCommand::SetInterval(10)),
            Err(MonitorError::ConsumerMissing(ConsumerKind::Lineplot))
        ));
    }

    #[test]
    fn unreachable_store_drops_ticks_but_keeps_running() {
        let (store, source) = setup();
        let mut registry = ConsumerRegistry::new();
        registry.create(consumer(ConsumerKind::Lineplot, &source), 2).unwrap();
        store.set_offline(true);
        thread::sleep(Duration::from_millis(40));
        registry
            .dispatch(ConsumerKind::Lineplot, ConsumerCommand::SelectChannel("c2".into()))
            .unwrap();
        let diagnostics = registry.diagnostics(ConsumerKind::Lineplot).unwrap();
        assert!(diagnostics.dropped_ticks >= 1);
        store.set_offline(false);
        thread::sleep(Duration::from_millis(20));
        let after = registry.diagnostics(ConsumerKind::Lineplot).unwrap();
        assert!(after.ticks > diagnostics.ticks);
        assert!(registry.is_active(ConsumerKind::Lineplot));
    }

    #[test]
    fn structural_errors_reach_the_caller() {
        let (_, source) = setup();
        let mut registry = ConsumerRegistry::new();
        registry.create(consumer(ConsumerKind::Heatmap, &source), 1_000).unwrap();
        let err = registry
            .dispatch(
                ConsumerKind::Heatmap,
                ConsumerCommand::SetFeature("UNKNOWN".into()),
            )
            .unwrap_err();
        assert!(matches!(err, MonitorError::UnknownFeature(_)));
    }
}
