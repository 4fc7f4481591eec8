//! Lifecycle/message event channel, grounded on the teacher's
//! `new_message_channel` usage in `communication/mod.rs` (a background
//! accept/connect task funneling events into one channel a server reads
//! from). Reimplemented over `tokio::sync::mpsc` since channel backends are
//! tied to the active async runtime, which defaults to tokio here.

use tokio::sync::mpsc;

pub type MessageChannelTx<T> = mpsc::UnboundedSender<T>;
pub type MessageChannelRx<T> = mpsc::UnboundedReceiver<T>;

/// Creates a connected sender/receiver pair.
pub fn new_message_channel<T>() -> (MessageChannelTx<T>, MessageChannelRx<T>) {
    mpsc::unbounded_channel()
}
