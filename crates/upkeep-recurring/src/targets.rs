use crate::{
    error::{RecurringError, Result},
    store::RecurringStore,
    types::{Property, RecurringTemplate},
};

/// Expand a template's scope into the properties it generates work for.
///
/// A zone resolves to its current members in store order and may be empty;
/// the caller decides how to surface that. A single property resolves to a
/// one-element list.
pub fn resolve_targets(
    store: &dyn RecurringStore,
    template: &RecurringTemplate,
) -> Result<Vec<Property>> {
    match (template.zone_id.as_deref(), template.property_id.as_deref()) {
        (Some(zone_id), None) => store.resolve_zone_properties(zone_id),
        (None, Some(property_id)) => {
            let property =
                store
                    .find_property(property_id)?
                    .ok_or_else(|| RecurringError::NotFound {
                        entity: "property",
                        id: property_id.to_string(),
                    })?;
            Ok(vec![property])
        }
        (None, None) => Err(RecurringError::invalid_template(
            &template.id,
            "neither zone_id nor property_id is set",
        )),
        (Some(_), Some(_)) => Err(RecurringError::invalid_template(
            &template.id,
            "both zone_id and property_id are set",
        )),
    }
}
