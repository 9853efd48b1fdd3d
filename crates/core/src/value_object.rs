//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity of their own; two instances holding the same
/// attribute values are interchangeable. A line of an allocation plan
/// ("5 units from batch X at cost Y") is a value object, the batch it points to
/// is an entity.
///
/// Value objects should be treated as immutable: to "change" one, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
