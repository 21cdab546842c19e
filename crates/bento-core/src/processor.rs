//! The uniform processor contract.
//!
//! Every audio-producing unit in the engine — internal plugins, hosted
//! plugins and tracks — implements [`Processor`]. Identity, channel
//! configuration, flags and the parameter registry live in a composed
//! [`ProcessorData`] rather than a base class; implementations expose it
//! through `data()`/`data_mut()` and the trait supplies the common behaviour
//! on top.
//!
//! # Threading
//!
//! Construction, `init` and `configure` run on the control side and may
//! allocate. `process_event` and `process_audio` run on the audio thread and
//! must not. The [`ProcessorContainer`] is the control side's registry of
//! everything that has been published to the engine; it holds descriptor
//! snapshots and shared value cells, never the processors themselves.

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer::SampleBuffer;
use crate::error::{EngineError, ProcessorError};
use crate::event::{EventId, ObjectId, RtEvent};
use crate::parameter::{ParameterDescriptor, ParameterRegistry};
use crate::queue::RtEventFifo;
use crate::transport::SharedTransport;

/// Runs a processor's non-RT tasks on the dispatcher's worker thread.
/// Handlers share state with their processor through whatever lock-free
/// mechanism the processor chooses; completions are delivered back to the
/// RT side as events.
pub trait AsyncWorkHandler: Send + Sync {
    /// Execute the task behind `event_id`, returning a status code that is
    /// forwarded to the processor in the completion event.
    fn run_task(&self, event_id: EventId) -> i32;

    /// Set a string property (a file path, typically) consumed by a later
    /// task. Processors without properties keep the default.
    fn set_property(&self, _name: &str, _value: &str) -> Result<(), ProcessorError> {
        Err(ProcessorError::UnsupportedOperation)
    }
}

/// Common state embedded in every processor implementation.
pub struct ProcessorData {
    id: ObjectId,
    name: String,
    label: String,
    enabled: bool,
    bypassed: bool,
    current_input_channels: usize,
    current_output_channels: usize,
    max_input_channels: usize,
    max_output_channels: usize,
    pub parameters: ParameterRegistry,
    incoming: RtEventFifo,
    outgoing: RtEventFifo,
    transport: Option<Arc<SharedTransport>>,
    current_program: Arc<AtomicU32>,
}

impl ProcessorData {
    pub fn new(label: &str, max_input_channels: usize, max_output_channels: usize) -> Self {
        Self {
            id: 0,
            name: String::new(),
            label: label.to_string(),
            enabled: false,
            bypassed: false,
            current_input_channels: max_input_channels,
            current_output_channels: max_output_channels,
            max_input_channels,
            max_output_channels,
            parameters: ParameterRegistry::new(),
            incoming: RtEventFifo::new(),
            outgoing: RtEventFifo::new(),
            transport: None,
            current_program: Arc::new(AtomicU32::new(0)),
        }
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn set_id(&mut self, id: ObjectId) {
        self.id = id;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[inline]
    pub fn bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    #[inline]
    pub fn input_channels(&self) -> usize {
        self.current_input_channels
    }

    #[inline]
    pub fn output_channels(&self) -> usize {
        self.current_output_channels
    }

    #[inline]
    pub fn max_input_channels(&self) -> usize {
        self.max_input_channels
    }

    #[inline]
    pub fn max_output_channels(&self) -> usize {
        self.max_output_channels
    }

    /// Fix the channel ceiling once the real counts are known (plugin load).
    /// Current counts follow; callers clamp them down afterwards if the
    /// surrounding track is narrower.
    pub fn set_max_channels(&mut self, inputs: usize, outputs: usize) {
        self.max_input_channels = inputs;
        self.max_output_channels = outputs;
        self.current_input_channels = inputs;
        self.current_output_channels = outputs;
    }

    pub fn set_input_channels(&mut self, channels: usize) {
        debug_assert!(channels <= self.max_input_channels);
        self.current_input_channels = channels.min(self.max_input_channels);
    }

    pub fn set_output_channels(&mut self, channels: usize) {
        debug_assert!(channels <= self.max_output_channels);
        self.current_output_channels = channels.min(self.max_output_channels);
    }

    pub fn set_transport(&mut self, transport: Arc<SharedTransport>) {
        self.transport = Some(transport);
    }

    /// Shared mirror of the active program index; wrappers store into it
    /// when a program change is applied on the audio thread.
    pub fn current_program_cell(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.current_program)
    }

    pub fn transport(&self) -> Option<&Arc<SharedTransport>> {
        self.transport.as_ref()
    }

    /// Queue an event for delivery at the next `process_audio`. RT-safe.
    #[inline]
    pub fn enqueue_event(&mut self, event: RtEvent) -> bool {
        self.incoming.push(event)
    }

    #[inline]
    pub fn next_event(&mut self) -> Option<RtEvent> {
        self.incoming.pop()
    }

    pub fn clear_pending_events(&mut self) {
        self.incoming.clear();
    }

    /// Emit an event toward the engine output queue. RT-safe.
    #[inline]
    pub fn output_event(&mut self, event: RtEvent) -> bool {
        self.outgoing.push(event)
    }

    #[inline]
    pub fn drain_output_events(&mut self, mut sink: impl FnMut(RtEvent)) {
        while let Some(event) = self.outgoing.pop() {
            sink(event);
        }
    }
}

/// The uniform audio/MIDI processing contract.
pub trait Processor: Send {
    fn data(&self) -> &ProcessorData;
    fn data_mut(&mut self) -> &mut ProcessorData;

    /// One-time preparation on the control side. Must be called exactly once
    /// before any `process_audio`. May allocate.
    fn init(&mut self, _sample_rate: f32) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// Re-preparation after a sample-rate change. Control side.
    fn configure(&mut self, _sample_rate: f32) {}

    /// Handle one event on the audio thread. Non-blocking.
    fn process_event(&mut self, event: RtEvent);

    /// Render one block on the audio thread. Must not allocate, lock or
    /// perform blocking I/O.
    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer);

    fn set_input_channels(&mut self, channels: usize) {
        self.data_mut().set_input_channels(channels);
    }

    fn set_output_channels(&mut self, channels: usize) {
        self.data_mut().set_output_channels(channels);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.data_mut().set_enabled(enabled);
    }

    fn set_bypassed(&mut self, bypassed: bool) {
        self.data_mut().set_bypassed(bypassed);
    }

    fn parameter_count(&self) -> usize {
        self.data().parameters.count()
    }

    fn parameter_from_id(&self, parameter_id: ObjectId) -> Option<&ParameterDescriptor> {
        self.data().parameters.descriptor(parameter_id)
    }

    /// Current value normalised to [0, 1].
    fn parameter_value(&self, parameter_id: ObjectId) -> Result<f32, ProcessorError> {
        self.data().parameters.normalized_value(parameter_id)
    }

    /// Current value in the parameter's own domain.
    fn parameter_value_in_domain(&self, parameter_id: ObjectId) -> Result<f32, ProcessorError> {
        self.data().parameters.domain_value(parameter_id)
    }

    fn parameter_value_formatted(&self, parameter_id: ObjectId) -> Result<String, ProcessorError> {
        self.data().parameters.formatted_value(parameter_id)
    }

    fn supports_programs(&self) -> bool {
        false
    }

    fn program_count(&self) -> usize {
        0
    }

    fn current_program(&self) -> usize {
        0
    }

    fn current_program_name(&self) -> Result<String, ProcessorError> {
        Err(ProcessorError::UnsupportedOperation)
    }

    fn program_name(&self, _program: usize) -> Result<String, ProcessorError> {
        Err(ProcessorError::UnsupportedOperation)
    }

    fn all_program_names(&self) -> Result<Vec<String>, ProcessorError> {
        Err(ProcessorError::UnsupportedOperation)
    }

    fn set_program(&mut self, _program: usize) -> Result<(), ProcessorError> {
        Err(ProcessorError::UnsupportedOperation)
    }
}

/// Control-side snapshot of a registered processor.
#[derive(Clone)]
pub struct ProcessorRecord {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    pub is_track: bool,
    /// Track this processor currently belongs to, if any.
    pub track: Option<ObjectId>,
    /// Current input channel count at registration time; a track's internal
    /// width.
    pub channels: usize,
    pub parameters: Vec<ParameterDescriptor>,
    pub values: Vec<crate::parameter::ParameterValue>,
    /// Program names snapshotted at registration; empty when the processor
    /// has no program support.
    pub programs: Vec<String>,
    pub current_program: Arc<AtomicU32>,
    pub async_handler: Option<Arc<dyn AsyncWorkHandler>>,
}

#[derive(Default)]
struct ContainerInner {
    next_id: ObjectId,
    records: HashMap<ObjectId, ProcessorRecord>,
    by_name: HashMap<String, ObjectId>,
}

/// Registry of everything published to the engine, consulted on the non-RT
/// side only. Ids start at 1; id 0 is the engine itself.
#[derive(Clone, Default)]
pub struct ProcessorContainer {
    inner: Arc<RwLock<ContainerInner>>,
}

impl ProcessorContainer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ContainerInner {
                next_id: 1,
                ..Default::default()
            })),
        }
    }

    /// Assign an id to a processor and snapshot its descriptors. Fails when
    /// the name is taken.
    pub fn register(
        &self,
        processor: &mut dyn Processor,
        is_track: bool,
        async_handler: Option<Arc<dyn AsyncWorkHandler>>,
    ) -> Result<ObjectId, EngineError> {
        let mut inner = self.inner.write();
        let name = processor.data().name().to_string();
        if name.is_empty() {
            return Err(EngineError::InvalidProcessor("empty name".to_string()));
        }
        if inner.by_name.contains_key(&name) {
            return Err(EngineError::InvalidProcessor(format!(
                "name '{}' already registered",
                name
            )));
        }
        let id = inner.next_id;
        inner.next_id += 1;
        processor.data_mut().set_id(id);

        let programs = if processor.supports_programs() {
            processor.all_program_names().unwrap_or_default()
        } else {
            Vec::new()
        };
        let data = processor.data();
        let record = ProcessorRecord {
            id,
            name: name.clone(),
            label: data.label().to_string(),
            is_track,
            track: None,
            channels: data.input_channels(),
            parameters: data.parameters.descriptors().to_vec(),
            values: data.parameters.values().to_vec(),
            programs,
            current_program: data.current_program_cell(),
            async_handler,
        };
        inner.records.insert(id, record);
        inner.by_name.insert(name, id);
        Ok(id)
    }

    pub fn deregister(&self, id: ObjectId) {
        let mut inner = self.inner.write();
        if let Some(record) = inner.records.remove(&id) {
            inner.by_name.remove(&record.name);
        }
    }

    pub fn rename(&self, id: ObjectId, new_name: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(new_name) {
            return Err(EngineError::InvalidProcessor(format!(
                "name '{}' already registered",
                new_name
            )));
        }
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| EngineError::InvalidProcessor(format!("id {}", id)))?;
        let old_name = std::mem::replace(&mut record.name, new_name.to_string());
        inner.by_name.remove(&old_name);
        inner.by_name.insert(new_name.to_string(), id);
        Ok(())
    }

    pub fn id_from_name(&self, name: &str) -> Option<ObjectId> {
        self.inner.read().by_name.get(name).copied()
    }

    pub fn record(&self, id: ObjectId) -> Option<ProcessorRecord> {
        self.inner.read().records.get(&id).cloned()
    }

    pub fn record_by_name(&self, name: &str) -> Option<ProcessorRecord> {
        let inner = self.inner.read();
        let id = inner.by_name.get(name)?;
        inner.records.get(id).cloned()
    }

    pub fn parameter_id_from_name(
        &self,
        processor_name: &str,
        parameter_name: &str,
    ) -> Option<ObjectId> {
        let record = self.record_by_name(processor_name)?;
        record
            .parameters
            .iter()
            .find(|p| p.name == parameter_name)
            .map(|p| p.id)
    }

    pub fn set_track_membership(&self, id: ObjectId, track: Option<ObjectId>) {
        if let Some(record) = self.inner.write().records.get_mut(&id) {
            record.track = track;
        }
    }

    pub fn tracks(&self) -> Vec<ProcessorRecord> {
        let mut tracks: Vec<_> = self
            .inner
            .read()
            .records
            .values()
            .filter(|r| r.is_track)
            .cloned()
            .collect();
        tracks.sort_by_key(|r| r.id);
        tracks
    }

    pub fn processors_on_track(&self, track: ObjectId) -> Vec<ProcessorRecord> {
        let mut processors: Vec<_> = self
            .inner
            .read()
            .records
            .values()
            .filter(|r| r.track == Some(track))
            .cloned()
            .collect();
        processors.sort_by_key(|r| r.id);
        processors
    }

    pub fn all(&self) -> Vec<ProcessorRecord> {
        let mut records: Vec<_> = self.inner.read().records.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RtEventData;

    struct NullProcessor {
        data: ProcessorData,
    }

    impl NullProcessor {
        fn named(name: &str) -> Self {
            let mut data = ProcessorData::new("Null", 2, 2);
            data.set_name(name);
            data.parameters
                .register_float("level", "Level", "", 0.0, 1.0, 0.5)
                .unwrap();
            Self { data }
        }
    }

    impl Processor for NullProcessor {
        fn data(&self) -> &ProcessorData {
            &self.data
        }
        fn data_mut(&mut self) -> &mut ProcessorData {
            &mut self.data
        }
        fn process_event(&mut self, _event: RtEvent) {}
        fn process_audio(&mut self, _input: &SampleBuffer, output: &mut SampleBuffer) {
            output.clear();
        }
    }

    #[test]
    fn test_registration_assigns_unique_ids() {
        let container = ProcessorContainer::new();
        let mut a = NullProcessor::named("a");
        let mut b = NullProcessor::named("b");

        let id_a = container.register(&mut a, false, None).unwrap();
        let id_b = container.register(&mut b, false, None).unwrap();
        assert_ne!(id_a, id_b);
        assert_eq!(a.data().id(), id_a);
        assert_eq!(container.id_from_name("b"), Some(id_b));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let container = ProcessorContainer::new();
        let mut a = NullProcessor::named("dup");
        let mut b = NullProcessor::named("dup");
        container.register(&mut a, false, None).unwrap();
        assert!(container.register(&mut b, false, None).is_err());
    }

    #[test]
    fn test_parameter_lookup_through_container() {
        let container = ProcessorContainer::new();
        let mut a = NullProcessor::named("synth");
        container.register(&mut a, false, None).unwrap();

        assert_eq!(container.parameter_id_from_name("synth", "level"), Some(0));
        assert_eq!(container.parameter_id_from_name("synth", "missing"), None);

        // Value cells are shared: the control side sees RT-side writes.
        a.data().parameters.value(0).unwrap().set(0.75);
        let record = container.record_by_name("synth").unwrap();
        assert_eq!(record.values[0].domain_value(), 0.75);
    }

    #[test]
    fn test_deregister_frees_name() {
        let container = ProcessorContainer::new();
        let mut a = NullProcessor::named("gone");
        let id = container.register(&mut a, false, None).unwrap();
        container.deregister(id);
        assert_eq!(container.id_from_name("gone"), None);

        let mut b = NullProcessor::named("gone");
        assert!(container.register(&mut b, false, None).is_ok());
    }

    #[test]
    fn test_rename() {
        let container = ProcessorContainer::new();
        let mut a = NullProcessor::named("old");
        let id = container.register(&mut a, false, None).unwrap();
        container.rename(id, "new").unwrap();
        assert_eq!(container.id_from_name("new"), Some(id));
        assert_eq!(container.id_from_name("old"), None);
    }

    #[test]
    fn test_enable_bypass_idempotent() {
        let mut processor = NullProcessor::named("p");
        processor.set_enabled(false);
        processor.set_enabled(false);
        assert!(!processor.data().enabled());

        processor.set_bypassed(true);
        processor.set_bypassed(true);
        assert!(processor.data().bypassed());
    }

    #[test]
    fn test_event_fifos() {
        let mut processor = NullProcessor::named("p");
        let event = RtEvent::new(1, 3, RtEventData::SetBypass { bypassed: true });
        assert!(processor.data_mut().enqueue_event(event));
        assert_eq!(processor.data_mut().next_event(), Some(event));
        assert_eq!(processor.data_mut().next_event(), None);

        processor.data_mut().output_event(event);
        let mut drained = Vec::new();
        processor.data_mut().drain_output_events(|e| drained.push(e));
        assert_eq!(drained.len(), 1);
    }
}
