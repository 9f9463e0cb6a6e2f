use prioria_core::Block;

/// Notified whenever a block joins the local chain, whether it finalized in a
/// local round or arrived through sync
pub trait FinalizationSink: Send + Sync {
    fn on_block_finalized(&self, block: &Block);
}
