use crate::addr::Addr;


/// Outbound seam to the discovery transport: publish this node's current visible identifier.
///  Fire-and-forget - the transport gives no delivery confirmation, and the previous identifier
///  is simply replaced.
#[cfg_attr(test, mockall::automock)]
pub trait Transmitter: Send {
    fn advertise(&mut self, identifier: &str);
}


/// Upward seam to application code: fired once per newly accepted message that is addressed to
///  this node or broadcast - never for duplicates or rejected out-of-order PDUs.
#[cfg_attr(test, mockall::automock)]
pub trait UpperLayerSink: Send {
    fn on_message_delivered(&mut self, from: Addr, payload: &[u8]);
}
