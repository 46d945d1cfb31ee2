use crate::aggregate::Granularity;

/// Namespace every aggregate cache key starts with.
pub const AGGREGATE_NAMESPACE: &str = "aggregate";

/// Returns the cache key for one aggregate.
///
/// `resource_key` is the resource name optionally followed by scope segments,
/// e.g. `"expenses"` or `"expenses:retailer:42"`.
///
/// # Examples
///
/// ```
/// use finsight_core::aggregate::Granularity;
/// use finsight_core::cache::aggregate_key;
///
/// assert_eq!(
///     aggregate_key("expenses:retailer:42", Granularity::Monthly),
///     "aggregate:expenses:retailer:42:Monthly"
/// );
/// ```
pub fn aggregate_key(resource_key: &str, granularity: Granularity) -> String {
    format!("{}:{}:{}", AGGREGATE_NAMESPACE, resource_key, granularity)
}

/// Returns the key prefix shared by every aggregate of a resource.
///
/// The trailing colon keeps `expenses` from matching `expenses_archive`.
pub fn resource_prefix(resource: &str) -> String {
    format!("{}:{}:", AGGREGATE_NAMESPACE, resource)
}

/// Extracts the resource name from an aggregate cache key, if present.
///
/// # Examples
///
/// ```
/// use finsight_core::cache::resource_from_key;
///
/// assert_eq!(resource_from_key("aggregate:vehicles:7:Yearly"), Some("vehicles"));
/// assert_eq!(resource_from_key("user:123"), None);
/// ```
pub fn resource_from_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(AGGREGATE_NAMESPACE)?.strip_prefix(':')?;
    let resource = rest.split(':').next()?;
    if resource.is_empty() {
        return None;
    }
    Some(resource)
}
