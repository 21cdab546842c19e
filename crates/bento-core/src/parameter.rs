//! Parameter descriptors, ranges and value cells.
//!
//! Parameters are described once at registration time and mutated from the
//! audio thread only. Values are stored in shared atomic cells in the
//! parameter's own domain (Hz, dB, plain gain, ...) so the control side can
//! read them without touching the processor, and convert to the normalised
//! `[0, 1]` form with the descriptor's range.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProcessorError;
use crate::event::ObjectId;
use crate::lockfree::AtomicFloat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Float,
    Int,
    Bool,
    String,
    Data,
}

/// Linear range over the parameter's domain values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRange {
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl ParameterRange {
    pub fn new(min: f32, max: f32, default: f32) -> Self {
        debug_assert!(max > min, "max must be greater than min");
        Self {
            min,
            max,
            default: default.clamp(min, max),
        }
    }

    /// The normalised [0, 1] range used by plugin standards.
    pub fn normalised() -> Self {
        Self::new(0.0, 1.0, 0.0)
    }

    #[inline]
    pub fn normalize(&self, value: f32) -> f32 {
        let span = self.max - self.min;
        if span <= 0.0 {
            return 0.0;
        }
        (value.clamp(self.min, self.max) - self.min) / span
    }

    #[inline]
    pub fn denormalize(&self, normalized: f32) -> f32 {
        self.min + normalized.clamp(0.0, 1.0) * (self.max - self.min)
    }

    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }
}

impl Default for ParameterRange {
    fn default() -> Self {
        Self::normalised()
    }
}

/// Immutable description of one parameter. The id doubles as the index into
/// the owning processor's registry; registration order is stable.
#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    pub unit: String,
    pub kind: ParameterType,
    pub range: ParameterRange,
}

/// Shared value cell holding the last-set domain value.
///
/// Writes happen on the audio thread; the control side reads through a
/// cloned handle.
#[derive(Debug, Clone)]
pub struct ParameterValue {
    cell: Arc<AtomicFloat>,
    range: ParameterRange,
}

impl ParameterValue {
    fn new(range: ParameterRange) -> Self {
        Self {
            cell: Arc::new(AtomicFloat::new(range.default)),
            range,
        }
    }

    #[inline]
    pub fn domain_value(&self) -> f32 {
        self.cell.get()
    }

    #[inline]
    pub fn normalized_value(&self) -> f32 {
        self.range.normalize(self.cell.get())
    }

    /// Set from a domain value, clamped on entry.
    #[inline]
    pub fn set(&self, value: f32) {
        self.cell.set(self.range.clamp(value));
    }

    #[inline]
    pub fn set_normalized(&self, normalized: f32) {
        self.cell.set(self.range.denormalize(normalized));
    }

    pub fn cell(&self) -> Arc<AtomicFloat> {
        Arc::clone(&self.cell)
    }

    pub fn range(&self) -> ParameterRange {
        self.range
    }
}

/// Per-processor parameter table. Ids are assigned in registration order.
#[derive(Default)]
pub struct ParameterRegistry {
    descriptors: Vec<ParameterDescriptor>,
    values: Vec<ParameterValue>,
    by_name: HashMap<String, ObjectId>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        kind: ParameterType,
        range: ParameterRange,
    ) -> Result<ParameterValue, ProcessorError> {
        if self.by_name.contains_key(name) {
            return Err(ProcessorError::Parameter(format!(
                "duplicate parameter name '{}'",
                name
            )));
        }
        let id = self.descriptors.len() as ObjectId;
        self.descriptors.push(ParameterDescriptor {
            id,
            name: name.to_string(),
            label: label.to_string(),
            unit: unit.to_string(),
            kind,
            range,
        });
        let value = ParameterValue::new(range);
        self.values.push(value.clone());
        self.by_name.insert(name.to_string(), id);
        Ok(value)
    }

    pub fn register_float(
        &mut self,
        name: &str,
        label: &str,
        unit: &str,
        min: f32,
        max: f32,
        default: f32,
    ) -> Result<ParameterValue, ProcessorError> {
        self.register(
            name,
            label,
            unit,
            ParameterType::Float,
            ParameterRange::new(min, max, default),
        )
    }

    pub fn register_int(
        &mut self,
        name: &str,
        label: &str,
        min: i32,
        max: i32,
        default: i32,
    ) -> Result<ParameterValue, ProcessorError> {
        self.register(
            name,
            label,
            "",
            ParameterType::Int,
            ParameterRange::new(min as f32, max as f32, default as f32),
        )
    }

    pub fn register_bool(
        &mut self,
        name: &str,
        label: &str,
        default: bool,
    ) -> Result<ParameterValue, ProcessorError> {
        self.register(
            name,
            label,
            "",
            ParameterType::Bool,
            ParameterRange::new(0.0, 1.0, if default { 1.0 } else { 0.0 }),
        )
    }

    /// Register a string-valued property. Properties have no numeric cell
    /// worth reading; the descriptor exists for introspection and routing.
    pub fn register_string(
        &mut self,
        name: &str,
        label: &str,
    ) -> Result<ParameterValue, ProcessorError> {
        self.register(
            name,
            label,
            "",
            ParameterType::String,
            ParameterRange::normalised(),
        )
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn descriptor(&self, id: ObjectId) -> Option<&ParameterDescriptor> {
        self.descriptors.get(id as usize)
    }

    pub fn descriptor_by_name(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.by_name
            .get(name)
            .and_then(|id| self.descriptors.get(*id as usize))
    }

    pub fn descriptors(&self) -> &[ParameterDescriptor] {
        &self.descriptors
    }

    #[inline]
    pub fn value(&self, id: ObjectId) -> Option<&ParameterValue> {
        self.values.get(id as usize)
    }

    pub fn values(&self) -> &[ParameterValue] {
        &self.values
    }

    pub fn normalized_value(&self, id: ObjectId) -> Result<f32, ProcessorError> {
        self.value(id)
            .map(ParameterValue::normalized_value)
            .ok_or(ProcessorError::ParameterNotFound(id))
    }

    pub fn domain_value(&self, id: ObjectId) -> Result<f32, ProcessorError> {
        self.value(id)
            .map(ParameterValue::domain_value)
            .ok_or(ProcessorError::ParameterNotFound(id))
    }

    pub fn formatted_value(&self, id: ObjectId) -> Result<String, ProcessorError> {
        let descriptor = self
            .descriptor(id)
            .ok_or(ProcessorError::ParameterNotFound(id))?;
        let value = self.domain_value(id)?;
        if descriptor.unit.is_empty() {
            Ok(format!("{:.2}", value))
        } else {
            Ok(format!("{:.2} {}", value, descriptor.unit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_normalize_roundtrip() {
        let range = ParameterRange::new(-12.0, 12.0, 0.0);
        assert_eq!(range.normalize(0.0), 0.5);
        assert_eq!(range.denormalize(0.5), 0.0);
        assert_eq!(range.normalize(-24.0), 0.0);
        assert_eq!(range.denormalize(2.0), 12.0);
    }

    #[test]
    fn test_registration_order_is_id_order() {
        let mut registry = ParameterRegistry::new();
        registry
            .register_float("gain", "Gain", "", 0.0, 1.0, 1.0)
            .unwrap();
        registry
            .register_float("pan", "Pan", "", -1.0, 1.0, 0.0)
            .unwrap();

        assert_eq!(registry.count(), 2);
        assert_eq!(registry.descriptor(0).unwrap().name, "gain");
        assert_eq!(registry.descriptor(1).unwrap().name, "pan");
        assert_eq!(registry.descriptor_by_name("pan").unwrap().id, 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ParameterRegistry::new();
        registry
            .register_float("gain", "Gain", "", 0.0, 1.0, 1.0)
            .unwrap();
        assert!(registry
            .register_float("gain", "Gain 2", "", 0.0, 1.0, 1.0)
            .is_err());
    }

    #[test]
    fn test_value_clamped_on_set() {
        let mut registry = ParameterRegistry::new();
        let value = registry
            .register_float("cutoff", "Cutoff", "Hz", 20.0, 20000.0, 1000.0)
            .unwrap();

        value.set(50000.0);
        assert_eq!(value.domain_value(), 20000.0);
        assert_eq!(registry.normalized_value(0).unwrap(), 1.0);

        value.set_normalized(0.0);
        assert_eq!(value.domain_value(), 20.0);
    }

    #[test]
    fn test_formatted_value() {
        let mut registry = ParameterRegistry::new();
        registry
            .register_float("freq", "Frequency", "Hz", 0.0, 100.0, 50.0)
            .unwrap();
        assert_eq!(registry.formatted_value(0).unwrap(), "50.00 Hz");
        assert!(registry.formatted_value(9).is_err());
    }
}
