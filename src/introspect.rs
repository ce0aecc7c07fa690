use crate::factory::session::ManagedEntity;
use std::any::Any;

/// Tri-state load classification.
///
/// `Unknown` means the object is absent or is not an instance this
/// provider's runtime manages; it is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loaded,
    NotLoaded,
    Unknown,
}

/// Whole-object load query.
pub fn is_loaded(instance: Option<&dyn Any>) -> LoadState {
    classify(instance, None)
}

/// Load query that may consult referenced state to answer.
///
/// A `None` attribute is identical to the whole-object query.
pub fn is_loaded_with_reference(instance: Option<&dyn Any>, attribute: Option<&str>) -> LoadState {
    classify(instance, attribute)
}

/// Load query that must not trigger loading of the attribute.
///
/// The in-memory runtime tracks load state eagerly, so the classification
/// matches [`is_loaded_with_reference`]; the distinction is the contract
/// that this variant never touches unfetched state.
pub fn is_loaded_without_reference(
    instance: Option<&dyn Any>,
    attribute: Option<&str>,
) -> LoadState {
    classify(instance, attribute)
}

fn classify(instance: Option<&dyn Any>, attribute: Option<&str>) -> LoadState {
    match instance.and_then(|obj| obj.downcast_ref::<ManagedEntity>()) {
        None => LoadState::Unknown,
        Some(entity) => entity.load_state(attribute),
    }
}
