//! Two-condition readiness latch for a joining client.
//!
//! A client is "started" once ICE candidate gathering with the rendezvous
//! peer has finished *and* the offer/answer handshake with it has been
//! acknowledged. The two can finish in either order; the latch fires exactly
//! once per reset cycle.

#[derive(Debug, Default)]
pub(crate) struct ReadinessLatch {
    ice_gathering_done: bool,
    handshake_done: bool,
    fired: bool,
}

impl ReadinessLatch {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Marks ICE gathering as finished. Returns `true` if this call latched
    /// the started condition.
    pub(crate) fn finish_ice_gathering(&mut self) -> bool {
        self.ice_gathering_done = true;
        self.try_latch()
    }

    /// Marks the offer/answer handshake as finished. Returns `true` if this
    /// call latched the started condition.
    pub(crate) fn finish_handshake(&mut self) -> bool {
        self.handshake_done = true;
        self.try_latch()
    }

    /// Clears both flags and re-arms the latch. Used on stop.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    fn try_latch(&mut self) -> bool {
        if self.fired || !(self.ice_gathering_done && self.handshake_done) {
            return false;
        }
        self.fired = true;
        true
    }
}
