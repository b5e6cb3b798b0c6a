// Copyright 2021 Ember Foundation. All rights reserved.
// Ember is free software and distributed under GNU General Public License.
// See http://www.gnu.org/licenses/

use ember_types::{Address, H256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

/// A log produced by contract execution.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LogEntry {
    /// The address of the contract which produced the log.
    pub address: Address,
    /// The topics of the log; the first one usually identifies the event.
    pub topics: Vec<H256>,
    /// The abi-encoded payload.
    pub data: Vec<u8>,
}

impl Encodable for LogEntry {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.address);
        s.append_list(&self.topics);
        s.append(&self.data);
    }
}

impl Decodable for LogEntry {
    fn decode(d: &Rlp) -> Result<Self, DecoderError> {
        Ok(LogEntry {
            address: d.val_at(0)?,
            topics: d.list_at(1)?,
            data: d.val_at(2)?,
        })
    }
}
