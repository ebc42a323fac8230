//! Core traits for the generic WebSocket infrastructure.

use super::session::Termination;

/// Consumer of inbound frames for one connection.
///
/// The handler is moved into the connection task and is only ever called from
/// there, one call at a time, in the order frames arrived on the wire.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// impl FrameHandler for Printer {
///     fn on_text(&mut self, text: &str) {
///         println!("frame: {text}");
///     }
/// }
/// ```
pub trait FrameHandler: Send + 'static {
    /// Handle one inbound text frame.
    ///
    /// Must not fail the connection: decoding problems are the handler's to
    /// report and swallow.
    fn on_text(&mut self, text: &str);

    /// Called once when the session ends for any reason other than an
    /// explicit close.
    fn on_terminated(&mut self, _termination: Termination) {}
}
