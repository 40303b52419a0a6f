//! Order normalization of one level of the handler tree

use crate::registry::HandlerNode;

/// Sort handlers by order; handlers without one run after every ordered
/// handler, equal orders keep registration order.
///
/// Called on every dispatch, never cached: the adjustment phase may have
/// shifted orders after registration.
pub fn normalize<'a, I>(handlers: I) -> Vec<&'a HandlerNode>
where
    I: IntoIterator<Item = &'a HandlerNode>,
{
    let mut sorted: Vec<&HandlerNode> = handlers.into_iter().collect();
    sorted.sort_by_key(|h| h.order_key());
    sorted
}
