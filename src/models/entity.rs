use std::sync::LazyLock;

use regex::Regex;

/// Domains are lowercase alphanumerics separated by single underscores.
static SLUG_PART_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:_[a-z0-9]+)*$").unwrap());

/// Object ids may not start or end with an underscore.
static OBJECT_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9_]*[a-z0-9])?$").unwrap());

/// Split an entity id such as `sensor.kitchen` into `("sensor", "kitchen")`.
pub fn split_entity_id(entity_id: &str) -> Option<(&str, &str)> {
    entity_id.split_once('.')
}

/// Domain part of an entity id, or the whole id when it has no dot.
pub fn entity_domain(entity_id: &str) -> &str {
    split_entity_id(entity_id).map_or(entity_id, |(domain, _)| domain)
}

/// Whether `domain` is a valid integration domain.
pub fn valid_domain(domain: &str) -> bool {
    SLUG_PART_REGEX.is_match(domain)
}

/// Whether `entity_id` has the `<domain>.<object_id>` shape.
pub fn valid_entity_id(entity_id: &str) -> bool {
    match split_entity_id(entity_id) {
        Some((domain, object_id)) => valid_domain(domain) && OBJECT_ID_REGEX.is_match(object_id),
        None => false,
    }
}
