//! One in-progress field exchange cycle with a single peer grid: direction,
//! registered field buffers, and (for sends) outstanding non-blocking
//! handles (`spec.md` §4.5).
//!
//! The original module-level state machine (Begin/Put/Get/End as four
//! separate calls against one implicit global Transfer) becomes an owned
//! session value here: [`crate::engine::Engine::begin_transfer`] returns a
//! `Transfer` that the caller threads through `put`/`get` calls and finally
//! hands to [`crate::engine::Engine::end_transfer`]. This is the natural
//! Rust shape for "a buffer is aliased by the core until End completes"
//! (`spec.md` §5): the borrow checker enforces it instead of a runtime
//! assertion.

use crate::config::Config;
use crate::error::CouplerError;
use crate::mapping::{Direction, Mapping};
use crate::message::{Communicator, PendingSend};
use std::sync::Arc;

/// Tag for the field-transfer point-to-point message, carried over unchanged
/// from the original wire protocol (`spec.md` §6).
pub const FIELD_TRANSFER_TAG: i32 = 0x7A960;

/// One send-side field registered via [`Transfer::put`]: a name and an owned
/// copy of the caller's buffer (the buffer is consumed immediately rather
/// than borrowed, since the weighted sum only needs to read it once, at
/// `end`).
struct SendField {
    name: String,
    data: Vec<f64>,
}

/// One receive-side field registered via [`Transfer::get`]: a name and a
/// borrow of the caller's buffer, live until `end` writes the accumulated
/// result into it.
struct RecvField<'b> {
    name: String,
    data: &'b mut [f64],
}

enum Registration<'b> {
    Unset,
    Send(Vec<SendField>),
    Recv(Vec<RecvField<'b>>),
}

/// One in-progress exchange cycle, bound to a single peer grid.
pub struct Transfer<'b> {
    peer_grid: String,
    time: i64,
    config: Arc<Config>,
    send_mappings: Vec<Mapping>,
    recv_mappings: Vec<Mapping>,
    registration: Registration<'b>,
}

impl<'b> Transfer<'b> {
    pub(crate) fn new(
        peer_grid: String,
        time: i64,
        config: Arc<Config>,
        send_mappings: Vec<Mapping>,
        recv_mappings: Vec<Mapping>,
    ) -> Self {
        Self {
            peer_grid,
            time,
            config,
            send_mappings,
            recv_mappings,
            registration: Registration::Unset,
        }
    }

    pub fn peer_grid(&self) -> &str {
        &self.peer_grid
    }

    /// The user-supplied cycle label this Transfer was opened with
    /// (informational only, `spec.md` §5).
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Registers an outbound field. `data` is copied; the source the caller
    /// passed may be reused immediately after this call returns. Fatal if
    /// `field_name` is not permitted on this edge (`spec.md` §4.5's
    /// `Config.can_send` check, §7.1) or if this Transfer has already
    /// registered a receive (`spec.md` §7.2).
    pub fn put(&mut self, field_name: &str, data: &[f64]) -> Result<(), CouplerError> {
        self.config
            .check_send(field_name, &self.peer_grid)
            .map_err(CouplerError::Config)?;
        match &mut self.registration {
            Registration::Unset => {
                self.registration = Registration::Send(vec![SendField {
                    name: field_name.to_string(),
                    data: data.to_vec(),
                }]);
                Ok(())
            }
            Registration::Send(fields) => {
                fields.push(SendField {
                    name: field_name.to_string(),
                    data: data.to_vec(),
                });
                Ok(())
            }
            Registration::Recv(_) => Err(CouplerError::protocol_state(
                "Put called on a Transfer that already registered a Get",
            )),
        }
    }

    /// Registers an inbound field. `data` is zeroed immediately (receives
    /// accumulate additively over multiple contributing peers, `spec.md`
    /// §4.5) and aliased by this Transfer until `end` completes. Fatal if
    /// `field_name` is not permitted on this edge (`spec.md` §4.5's
    /// `Config.can_recv` check, §7.1) or if this Transfer has already
    /// registered a send.
    pub fn get(&mut self, field_name: &str, data: &'b mut [f64]) -> Result<(), CouplerError> {
        self.config
            .check_recv(field_name, &self.peer_grid)
            .map_err(CouplerError::Config)?;
        data.fill(0.0);
        match &mut self.registration {
            Registration::Unset => {
                self.registration = Registration::Recv(vec![RecvField {
                    name: field_name.to_string(),
                    data,
                }]);
                Ok(())
            }
            Registration::Recv(fields) => {
                fields.push(RecvField {
                    name: field_name.to_string(),
                    data,
                });
                Ok(())
            }
            Registration::Send(_) => Err(CouplerError::protocol_state(
                "Get called on a Transfer that already registered a Put",
            )),
        }
    }

    /// Executes the registered exchange: on the send side, applies each
    /// Mapping's weights and issues non-blocking sends; on the receive
    /// side, blocks for each Mapping's message and accumulates into the
    /// caller's buffers. Returns the send side's still-outstanding handles
    /// for the caller to retain until the next `Begin` or `Finalize`
    /// (`spec.md` §4.5 step 5).
    pub fn end(
        self,
        communicator: &dyn Communicator,
    ) -> Result<Vec<Box<dyn PendingSend>>, CouplerError> {
        match self.registration {
            Registration::Unset => Err(CouplerError::protocol_state(
                "End called with nothing registered",
            )),
            Registration::Send(fields) => {
                Ok(send(communicator, &self.send_mappings, &fields))
            }
            Registration::Recv(mut fields) => {
                recv(communicator, &self.recv_mappings, &mut fields);
                Ok(Vec::new())
            }
        }
    }
}

fn send(
    communicator: &dyn Communicator,
    mappings: &[Mapping],
    fields: &[SendField],
) -> Vec<Box<dyn PendingSend>> {
    let mut pending = Vec::with_capacity(mappings.len());
    for mapping in mappings {
        let a_count = mapping.a_point_count();
        let mut out = vec![0.0f64; a_count * fields.len()];
        for (field_idx, field) in fields.iter().enumerate() {
            for (a_idx, a) in mapping.a_points_ordered().enumerate() {
                let mut acc = 0.0;
                for &(b, w) in mapping.b_edges(a) {
                    acc += field.data[b as usize] * w;
                }
                out[field_idx * a_count + a_idx] = acc;
            }
        }
        let dest = mapping.remote_tile().tile_id() as usize;
        let bytes: Vec<u8> = out.iter().flat_map(|v| v.to_le_bytes()).collect();
        pending.push(communicator.isend(dest, FIELD_TRANSFER_TAG, bytes));
    }
    pending
}

fn recv(communicator: &dyn Communicator, mappings: &[Mapping], fields: &mut [RecvField<'_>]) {
    for mapping in mappings {
        let a_count = mapping.a_point_count();
        let source = mapping.remote_tile().tile_id() as usize;
        let bytes = communicator.recv(source, FIELD_TRANSFER_TAG);
        let values: Vec<f64> = bytes
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        debug_assert_eq!(values.len(), a_count * fields.len());
        for (field_idx, field) in fields.iter_mut().enumerate() {
            for (a_idx, a) in mapping.a_points_ordered().enumerate() {
                field.data[a as usize] += values[field_idx * a_count + a_idx];
            }
        }
    }
}
