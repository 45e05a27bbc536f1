//! Boundary framing driver
//!
//! Default body of [`Handler::check_request`]: split every complete unit
//! off the receive buffer and hand it to `handle_request`, keeping any
//! partial tail for the next read.

use sockplex_core::Result;

use crate::handler::{Context, Handler};

/// Dispatch every complete request in the receive buffer.
///
/// Stops at the first error, when the handler kills the connection, when
/// a callback replaces the boundary with `None` or installs a new handler.
/// Connections without a boundary keep their bytes buffered for the
/// handler to pick up.
pub fn check_boundary<H: Handler + ?Sized>(handler: &mut H, cx: &mut Context<'_>) -> Result<()> {
    loop {
        let conn = cx.conn();
        if conn.is_killed() || conn.handler_replaced() {
            return Ok(());
        }
        let next = conn
            .boundary()
            .and_then(|b| b.next_unit(conn.recv_buffer().as_slice()));
        let Some(unit) = next else {
            return Ok(());
        };
        let mut request = conn.recv_buffer_mut().split_to(unit.consumed);
        request.truncate(unit.payload);
        handler.handle_request(cx, &request)?;
    }
}
